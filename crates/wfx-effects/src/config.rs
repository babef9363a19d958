//! Config-ID algebra: translating declared flag and mode names into packed
//! config indices and back.

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::data::{ConfigTableDef, StringId, INVALID_ID};

fn config_flags(config_id: u32, fv_count: u32) -> u32 {
    config_id % fv_count
}

fn config_mode(config_id: u32, fv_count: u32) -> u32 {
    config_id / fv_count
}

fn pack_config_id(flags: u32, mode: u32, fv_count: u32) -> u32 {
    flags + mode * fv_count
}

/// Encodes and decodes intra-repo config IDs against a repo's declared flag
/// and mode names.
#[derive(Debug, Default, Clone)]
pub struct ConfigIdTable {
    def: ConfigTableDef,
    name_flag_map: FxHashMap<StringId, u32>,
    name_mode_map: FxHashMap<StringId, u32>,
}

impl ConfigIdTable {
    pub fn new(def: ConfigTableDef) -> Self {
        let mut name_flag_map = FxHashMap::default();
        let mut name_mode_map = FxHashMap::default();

        for (i, &name_id) in def.flag_ids.iter().enumerate() {
            name_flag_map.insert(name_id, 1u32 << i);
        }

        for (i, &name_id) in def.mode_ids.iter().enumerate() {
            name_mode_map.insert(name_id, i as u32);
        }

        ConfigIdTable {
            def,
            name_flag_map,
            name_mode_map,
        }
    }

    pub fn definition(&self) -> &ConfigTableDef {
        &self.def
    }

    pub fn flag_combinations(&self) -> u32 {
        self.def.flag_combinations()
    }

    pub fn mode_count(&self) -> u32 {
        self.def.mode_count()
    }

    pub fn config_count(&self) -> u32 {
        self.def.config_count()
    }

    /// Sets the named flag for the given config and returns the new config ID.
    /// Returns `None` for a name that is not a declared flag.
    pub fn set_flag(&self, name_id: StringId, value: bool, config_id: u32) -> Option<u32> {
        let flag = *self.name_flag_map.get(&name_id)?;
        let fv = self.flag_combinations();
        let mode = config_mode(config_id, fv);
        let mut flags = config_flags(config_id, fv);

        if value {
            flags |= flag;
        } else {
            flags &= !flag;
        }

        Some(pack_config_id(flags, mode, fv))
    }

    /// Sets the named mode for the given config and returns the new config ID.
    pub fn set_mode(&self, name_id: StringId, config_id: u32) -> Option<u32> {
        let mode = *self.name_mode_map.get(&name_id)?;
        let fv = self.flag_combinations();
        let flags = config_flags(config_id, fv);
        Some(pack_config_id(flags, mode, fv))
    }

    /// True if `config_id` sets the flag or mode named by `name_id`.
    pub fn is_defined(&self, name_id: StringId, config_id: u32) -> bool {
        assert_ne!(name_id, INVALID_ID, "name ID invalid");

        if let Some(&flag) = self.name_flag_map.get(&name_id) {
            let flags = config_flags(config_id, self.flag_combinations());
            (flags & flag) == flag
        } else if let Some(&mode) = self.name_mode_map.get(&name_id) {
            config_mode(config_id, self.flag_combinations()) == mode
        } else {
            false
        }
    }

    /// Resets the mode to the default while preserving flags.
    pub fn reset_mode(&self, config_id: u32) -> u32 {
        let fv = self.flag_combinations();
        pack_config_id(config_flags(config_id, fv), 0, fv)
    }

    /// Resets all flags while preserving the mode.
    pub fn reset_flags(&self, config_id: u32) -> u32 {
        let fv = self.flag_combinations();
        pack_config_id(0, config_mode(config_id, fv), fv)
    }

    /// Collects all mode and flag names set for the given config. The default
    /// mode (index 0) is not emitted.
    pub fn get_defines(&self, config_id: u32, defines: &mut Vec<StringId>) {
        let fv = self.flag_combinations();
        let mode = config_mode(config_id, fv);
        let mut flags = config_flags(config_id, fv);

        assert!(
            flags < fv && mode < self.mode_count(),
            "config ID {config_id} out of range"
        );

        if mode != 0 {
            defines.push(self.def.mode_ids[mode as usize]);
        }

        let mut flag_index = 0usize;
        while flags > 0 {
            if (flags & 1) == 1 {
                defines.push(self.def.flag_ids[flag_index]);
            }
            flag_index += 1;
            flags >>= 1;
        }
    }

    /// Builds a config ID from a list of define name IDs. When mutually
    /// exclusive modes appear, the latest wins and a warning is logged.
    pub fn set_defines(&self, defines: &[StringId]) -> u32 {
        let mut mode = 0u32;
        let mut flags = 0u32;

        for &name_id in defines {
            if let Some(&new_mode) = self.name_mode_map.get(&name_id) {
                if mode != 0 && new_mode != 0 {
                    warn!(
                        mode = new_mode,
                        "mutually exclusive shader modes specified in the same define list; \
                         the latest wins"
                    );
                }
                mode = new_mode;
            } else if let Some(&flag) = self.name_flag_map.get(&name_id) {
                flags |= flag;
            } else {
                warn!(name_id, "unrecognized shader define ignored");
            }
        }

        pack_config_id(flags, mode, self.flag_combinations())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ConfigIdTable {
        // flags A=10, B=11; modes default=20, HQ=21, LQ=22
        ConfigIdTable::new(ConfigTableDef {
            flag_ids: vec![10, 11],
            mode_ids: vec![20, 21, 22],
        })
    }

    #[test]
    fn pack_unpack_is_exact() {
        let t = table();
        for m in 0..3u32 {
            for f in 0..4u32 {
                let id = f + m * t.flag_combinations();
                assert_eq!(config_flags(id, t.flag_combinations()), f);
                assert_eq!(config_mode(id, t.flag_combinations()), m);
            }
        }
    }

    #[test]
    fn flag_round_trip() {
        let t = table();
        let id = t.set_flag(11, true, 0).unwrap();
        assert_eq!(id, 0b10);
        assert!(t.is_defined(11, id));
        assert!(!t.is_defined(10, id));
        let id = t.set_flag(11, false, id).unwrap();
        assert_eq!(id, 0);
        assert_eq!(t.set_flag(99, true, 0), None);
    }

    #[test]
    fn mode_selection() {
        let t = table();
        let id = t.set_mode(22, 0b11).unwrap();
        assert_eq!(id, 0b11 + 2 * 4);
        assert!(t.is_defined(22, id));
        assert!(t.is_defined(10, id));
        assert_eq!(t.reset_mode(id), 0b11);
        assert_eq!(t.reset_flags(id), 2 * 4);
    }

    #[test]
    fn defines_round_trip() {
        let t = table();
        let id = t.set_defines(&[11, 21]);
        let mut names = Vec::new();
        t.get_defines(id, &mut names);
        assert_eq!(names, vec![21, 11]);

        // default mode is not emitted
        let mut names = Vec::new();
        t.get_defines(0b01, &mut names);
        assert_eq!(names, vec![10]);
    }

    #[test]
    fn latest_mode_wins() {
        let t = table();
        let id = t.set_defines(&[21, 22]);
        assert!(t.is_defined(22, id));
        assert!(!t.is_defined(21, id));
    }
}
