//! Binary serialization of library definitions and the compressed cache
//! archive.
//!
//! The byte layout is explicit and little-endian throughout: variable-length
//! sequences carry a `u32` length prefix, strings are length-prefixed UTF-8,
//! optional registry IDs use the `INVALID_ID` sentinel. Field order follows
//! the definition structs exactly; the payload is framed by a magic tag and
//! schema version so stale caches are rejected, not misread.

use std::io::Write;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::data::{
    ConfigTableDef, ConstBufDef, ConstDef, EffectDef, EffectVariantDef, IOElementDef, PlatformDef,
    PlatformTarget, ResourceDef, ShadeStage, ShaderDef, ShaderLibDef, ShaderRegistryDef,
    ShaderVariantDef, VariantDef, VariantRepoDef, INVALID_ID,
};
use crate::error::CacheError;
use crate::shader_types::ShaderTypes;

const LIB_MAGIC: u32 = 0x4658_5746; // "FWXF"
const LIB_SCHEMA_VERSION: u16 = 1;

/// Default compression level for cache archives.
pub const DEFAULT_COMPRESSION_LEVEL: u8 = 6;

type ReadResult<T> = std::result::Result<T, CacheError>;

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data }
    }

    fn u8(&mut self) -> ReadResult<u8> {
        self.data.read_u8().map_err(|_| CacheError::Truncated)
    }

    fn u16(&mut self) -> ReadResult<u16> {
        self.data
            .read_u16::<LittleEndian>()
            .map_err(|_| CacheError::Truncated)
    }

    fn u32(&mut self) -> ReadResult<u32> {
        self.data
            .read_u32::<LittleEndian>()
            .map_err(|_| CacheError::Truncated)
    }

    fn u64(&mut self) -> ReadResult<u64> {
        self.data
            .read_u64::<LittleEndian>()
            .map_err(|_| CacheError::Truncated)
    }

    fn opt_u32(&mut self) -> ReadResult<Option<u32>> {
        let value = self.u32()?;
        Ok((value != INVALID_ID).then_some(value))
    }

    fn len(&mut self) -> ReadResult<usize> {
        let len = self.u32()? as usize;
        if len > self.data.len() {
            return Err(CacheError::Truncated);
        }
        Ok(len)
    }

    fn bytes(&mut self) -> ReadResult<Vec<u8>> {
        let len = self.len()?;
        let (head, tail) = self.data.split_at(len);
        let out = head.to_vec();
        self.data = tail;
        Ok(out)
    }

    fn string(&mut self) -> ReadResult<String> {
        String::from_utf8(self.bytes()?)
            .map_err(|_| CacheError::Schema("invalid UTF-8 in string table".to_string()))
    }

    fn seq<T>(&mut self, mut read: impl FnMut(&mut Self) -> ReadResult<T>) -> ReadResult<Vec<T>> {
        let len = self.len()?;
        let mut out = Vec::with_capacity(len.min(1 << 20));
        for _ in 0..len {
            out.push(read(self)?);
        }
        Ok(out)
    }
}

fn w_u32(out: &mut Vec<u8>, value: u32) {
    out.write_u32::<LittleEndian>(value).expect("vec write");
}

fn w_opt(out: &mut Vec<u8>, value: Option<u32>) {
    w_u32(out, value.unwrap_or(INVALID_ID));
}

fn w_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    w_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

fn w_string(out: &mut Vec<u8>, value: &str) {
    w_bytes(out, value.as_bytes());
}

fn w_seq<T>(out: &mut Vec<u8>, items: &[T], mut write: impl FnMut(&mut Vec<u8>, &T)) {
    w_u32(out, items.len() as u32);
    for item in items {
        write(out, item);
    }
}

fn write_platform(out: &mut Vec<u8>, def: &PlatformDef) {
    w_string(out, &def.preproc_version);
    w_u32(out, def.preproc_build);
    w_string(out, &def.backend_version);
    w_string(out, &def.feature_level);
    out.push(def.target as u8);
}

fn read_platform(r: &mut Reader<'_>) -> ReadResult<PlatformDef> {
    Ok(PlatformDef {
        preproc_version: r.string()?,
        preproc_build: r.u32()?,
        backend_version: r.string()?,
        feature_level: r.string()?,
        target: PlatformTarget::from_u8(r.u8()?)
            .ok_or_else(|| CacheError::Schema("unknown platform target".to_string()))?,
    })
}

fn write_shader(out: &mut Vec<u8>, def: &ShaderDef) {
    w_u32(out, def.file_id);
    w_u32(out, def.byte_code_id);
    w_u32(out, def.name_id);
    out.push(def.stage as u8);
    w_u32(out, def.thread_group_size.0);
    w_u32(out, def.thread_group_size.1);
    w_u32(out, def.thread_group_size.2);
    w_opt(out, def.in_layout_id);
    w_opt(out, def.out_layout_id);
    w_opt(out, def.res_layout_id);
    w_opt(out, def.cbuf_group_id);
}

fn read_shader(r: &mut Reader<'_>) -> ReadResult<ShaderDef> {
    Ok(ShaderDef {
        file_id: r.u32()?,
        byte_code_id: r.u32()?,
        name_id: r.u32()?,
        stage: ShadeStage::from_u8(r.u8()?)
            .ok_or_else(|| CacheError::Schema("unknown shade stage".to_string()))?,
        thread_group_size: (r.u32()?, r.u32()?, r.u32()?),
        in_layout_id: r.opt_u32()?,
        out_layout_id: r.opt_u32()?,
        res_layout_id: r.opt_u32()?,
        cbuf_group_id: r.opt_u32()?,
    })
}

fn write_variant(out: &mut Vec<u8>, def: &VariantDef) {
    w_seq(out, &def.shaders, |out, s: &ShaderVariantDef| {
        w_u32(out, s.shader_id);
        w_u32(out, s.variant_id);
    });
    w_seq(out, &def.effects, |out, e: &EffectVariantDef| {
        w_u32(out, e.effect_id);
        w_u32(out, e.variant_id);
    });
}

fn read_variant(r: &mut Reader<'_>) -> ReadResult<VariantDef> {
    Ok(VariantDef {
        shaders: r.seq(|r| {
            Ok(ShaderVariantDef {
                shader_id: r.u32()?,
                variant_id: r.u32()?,
            })
        })?,
        effects: r.seq(|r| {
            Ok(EffectVariantDef {
                effect_id: r.u32()?,
                variant_id: r.u32()?,
            })
        })?,
    })
}

fn write_repo(out: &mut Vec<u8>, def: &VariantRepoDef) {
    w_string(out, &def.path);
    w_u32(out, def.source_size_bytes);
    w_u32(out, def.source_crc32);
    w_seq(out, &def.config_table.flag_ids, |out, &id| w_u32(out, id));
    w_seq(out, &def.config_table.mode_ids, |out, &id| w_u32(out, id));
    w_seq(out, &def.variants, |out, v| write_variant(out, v));
}

fn read_repo(r: &mut Reader<'_>) -> ReadResult<VariantRepoDef> {
    Ok(VariantRepoDef {
        path: r.string()?,
        source_size_bytes: r.u32()?,
        source_crc32: r.u32()?,
        config_table: ConfigTableDef {
            flag_ids: r.seq(|r| r.u32())?,
            mode_ids: r.seq(|r| r.u32())?,
        },
        variants: r.seq(read_variant)?,
    })
}

fn write_registry(out: &mut Vec<u8>, def: &ShaderRegistryDef) {
    w_seq(out, &def.constants, |out, c: &ConstDef| {
        w_u32(out, c.string_id);
        w_u32(out, c.offset);
        w_u32(out, c.size);
    });
    w_seq(out, &def.const_bufs, |out, c: &ConstBufDef| {
        w_u32(out, c.string_id);
        w_u32(out, c.size);
        w_u32(out, c.layout_id);
    });
    w_seq(out, &def.io_elements, |out, e: &IOElementDef| {
        w_u32(out, e.semantic_id);
        w_u32(out, e.semantic_index);
        w_u32(out, e.data_type);
        w_u32(out, e.component_count);
        w_u32(out, e.size);
    });
    w_seq(out, &def.resources, |out, res: &ResourceDef| {
        w_u32(out, res.string_id);
        out.write_u64::<LittleEndian>(res.kind.bits()).expect("vec write");
        w_u32(out, res.slot);
    });
    w_seq(out, &def.id_groups, |out, group: &Vec<u32>| {
        w_seq(out, group, |out, &id| w_u32(out, id));
    });
    w_seq(out, &def.byte_code, |out, blob: &Vec<u8>| {
        w_bytes(out, blob);
    });
    w_seq(out, &def.shaders, |out, s| write_shader(out, s));
    w_seq(out, &def.effects, |out, e: &EffectDef| {
        w_u32(out, e.name_id);
        w_u32(out, e.pass_group_id);
    });
}

fn read_registry(r: &mut Reader<'_>) -> ReadResult<ShaderRegistryDef> {
    Ok(ShaderRegistryDef {
        constants: r.seq(|r| {
            Ok(ConstDef {
                string_id: r.u32()?,
                offset: r.u32()?,
                size: r.u32()?,
            })
        })?,
        const_bufs: r.seq(|r| {
            Ok(ConstBufDef {
                string_id: r.u32()?,
                size: r.u32()?,
                layout_id: r.u32()?,
            })
        })?,
        io_elements: r.seq(|r| {
            Ok(IOElementDef {
                semantic_id: r.u32()?,
                semantic_index: r.u32()?,
                data_type: r.u32()?,
                component_count: r.u32()?,
                size: r.u32()?,
            })
        })?,
        resources: r.seq(|r| {
            Ok(ResourceDef {
                string_id: r.u32()?,
                kind: ShaderTypes::from_bits_retain(r.u64()?),
                slot: r.u32()?,
            })
        })?,
        id_groups: r.seq(|r| r.seq(|r| r.u32()))?,
        byte_code: r.seq(|r| r.bytes())?,
        shaders: r.seq(read_shader)?,
        effects: r.seq(|r| {
            Ok(EffectDef {
                name_id: r.u32()?,
                pass_group_id: r.u32()?,
            })
        })?,
    })
}

/// Serializes a library definition into the explicit binary layout.
pub fn serialize_shader_lib(def: &ShaderLibDef) -> Vec<u8> {
    let mut out = Vec::with_capacity(4096);
    w_u32(&mut out, LIB_MAGIC);
    out.write_u16::<LittleEndian>(LIB_SCHEMA_VERSION)
        .expect("vec write");

    w_string(&mut out, &def.name);
    write_platform(&mut out, &def.platform);
    w_seq(&mut out, &def.repos, |out, repo| write_repo(out, repo));
    write_registry(&mut out, &def.registry);
    w_seq(&mut out, &def.strings, |out, s: &String| w_string(out, s));
    out
}

/// Deserializes a library definition, validating magic and schema version.
pub fn deserialize_shader_lib(data: &[u8]) -> ReadResult<ShaderLibDef> {
    let mut r = Reader::new(data);

    if r.u32()? != LIB_MAGIC {
        return Err(CacheError::Schema("bad library magic".to_string()));
    }
    let version = r.u16()?;
    if version != LIB_SCHEMA_VERSION {
        return Err(CacheError::Schema(format!(
            "library schema v{version}, expected v{LIB_SCHEMA_VERSION}"
        )));
    }

    Ok(ShaderLibDef {
        name: r.string()?,
        platform: read_platform(&mut r)?,
        repos: r.seq(read_repo)?,
        registry: read_registry(&mut r)?,
        strings: r.seq(|r| r.string())?,
    })
}

/// A zlib deflate archive with a checksum over the pre-compression bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZlibArchive {
    /// zlib level used; 9 smallest, 1 fastest.
    pub compression_level: u8,
    /// CRC32 of the original bytestream, validated on load.
    pub original_crc32: u32,
    pub original_size_bytes: u32,
    pub data: Vec<u8>,
}

impl ZlibArchive {
    /// Compresses `input` at the given level.
    pub fn compress(input: &[u8], compression_level: u8) -> Self {
        let mut encoder = ZlibEncoder::new(
            Vec::new(),
            Compression::new(compression_level.min(9) as u32),
        );
        encoder.write_all(input).expect("vec write");
        let data = encoder.finish().expect("vec write");

        ZlibArchive {
            compression_level,
            original_crc32: crc32fast::hash(input),
            original_size_bytes: input.len() as u32,
            data,
        }
    }

    /// Decompresses and validates size and checksum.
    pub fn decompress(&self) -> ReadResult<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(&self.data[..]);
        let mut out = Vec::with_capacity(self.original_size_bytes as usize);
        std::io::Read::read_to_end(&mut decoder, &mut out)
            .map_err(|e| CacheError::Decompress(e.to_string()))?;

        if out.len() != self.original_size_bytes as usize {
            return Err(CacheError::Schema("decompressed size mismatch".to_string()));
        }

        let actual = crc32fast::hash(&out);
        if actual != self.original_crc32 {
            return Err(CacheError::ChecksumMismatch {
                expected: self.original_crc32,
                actual,
            });
        }

        Ok(out)
    }

    /// Serializes the archive frame: `{level:u8, crc32:u32, size:u32, data}`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 16);
        out.push(self.compression_level);
        w_u32(&mut out, self.original_crc32);
        w_u32(&mut out, self.original_size_bytes);
        w_bytes(&mut out, &self.data);
        out
    }

    pub fn from_bytes(data: &[u8]) -> ReadResult<Self> {
        let mut r = Reader::new(data);
        Ok(ZlibArchive {
            compression_level: r.u8()?,
            original_crc32: r.u32()?,
            original_size_bytes: r.u32()?,
            data: r.bytes()?,
        })
    }

    pub fn compression_ratio(&self) -> f32 {
        if self.original_size_bytes == 0 {
            return 1.0;
        }
        self.data.len() as f32 / self.original_size_bytes as f32
    }
}

/// Serializes, compresses and frames a library definition as cache-file
/// contents.
pub fn write_cache_archive(def: &ShaderLibDef, compression_level: u8) -> Vec<u8> {
    let payload = serialize_shader_lib(def);
    ZlibArchive::compress(&payload, compression_level).to_bytes()
}

/// Loads a library definition from cache-file contents.
pub fn read_cache_archive(data: &[u8]) -> ReadResult<ShaderLibDef> {
    let archive = ZlibArchive::from_bytes(data)?;
    let payload = archive.decompress()?;
    deserialize_shader_lib(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lib() -> ShaderLibDef {
        ShaderLibDef {
            name: "sample".to_string(),
            platform: PlatformDef {
                preproc_version: "0.1.0".to_string(),
                preproc_build: 1,
                backend_version: "test-backend".to_string(),
                feature_level: "5_0".to_string(),
                target: PlatformTarget::DirectX11,
            },
            repos: vec![VariantRepoDef {
                path: "fx/sample.wfx".to_string(),
                source_size_bytes: 120,
                source_crc32: 0xDEADBEEF,
                config_table: ConfigTableDef {
                    flag_ids: vec![3, 4],
                    mode_ids: vec![5],
                },
                variants: vec![VariantDef {
                    shaders: vec![ShaderVariantDef {
                        shader_id: 0,
                        variant_id: 0,
                    }],
                    effects: vec![EffectVariantDef {
                        effect_id: 0,
                        variant_id: 0,
                    }],
                }],
            }],
            registry: ShaderRegistryDef {
                constants: vec![ConstDef {
                    string_id: 0,
                    offset: 0,
                    size: 16,
                }],
                const_bufs: vec![ConstBufDef {
                    string_id: 1,
                    size: 16,
                    layout_id: 0,
                }],
                io_elements: vec![IOElementDef {
                    semantic_id: 2,
                    semantic_index: 0,
                    data_type: 3,
                    component_count: 4,
                    size: 16,
                }],
                resources: vec![ResourceDef {
                    string_id: 3,
                    kind: ShaderTypes::TEXTURE_2D,
                    slot: 0,
                }],
                id_groups: vec![vec![0], vec![0, 1]],
                byte_code: vec![b"DXBC-sample".to_vec()],
                shaders: vec![ShaderDef {
                    file_id: 4,
                    byte_code_id: 0,
                    name_id: 5,
                    stage: ShadeStage::Pixel,
                    thread_group_size: (0, 0, 0),
                    in_layout_id: Some(0),
                    out_layout_id: None,
                    res_layout_id: Some(1),
                    cbuf_group_id: None,
                }],
                effects: vec![EffectDef {
                    name_id: 6,
                    pass_group_id: 0,
                }],
            },
            strings: (0..7).map(|i| format!("str{i}")).collect(),
        }
    }

    #[test]
    fn lib_round_trip() {
        let lib = sample_lib();
        let bytes = serialize_shader_lib(&lib);
        let restored = deserialize_shader_lib(&bytes).unwrap();
        assert_eq!(lib, restored);
    }

    #[test]
    fn bad_magic_is_schema_error() {
        let mut bytes = serialize_shader_lib(&sample_lib());
        bytes[0] ^= 0xFF;
        assert!(matches!(
            deserialize_shader_lib(&bytes),
            Err(CacheError::Schema(_))
        ));
    }

    #[test]
    fn truncated_payload_is_detected() {
        let bytes = serialize_shader_lib(&sample_lib());
        let truncated = &bytes[..bytes.len() / 2];
        assert!(deserialize_shader_lib(truncated).is_err());
    }

    #[test]
    fn archive_round_trip() {
        let lib = sample_lib();
        let framed = write_cache_archive(&lib, DEFAULT_COMPRESSION_LEVEL);
        let restored = read_cache_archive(&framed).unwrap();
        assert_eq!(lib, restored);
    }

    #[test]
    fn corrupted_archive_fails_checksum() {
        let payload = b"the original payload bytes".to_vec();
        let mut archive = ZlibArchive::compress(&payload, 6);
        archive.original_crc32 ^= 1;
        assert!(matches!(
            archive.decompress(),
            Err(CacheError::ChecksumMismatch { .. })
        ));
    }
}
