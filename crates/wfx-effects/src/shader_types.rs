//! Shader type classification bitset and the intrinsic type table.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

bitflags::bitflags! {
    /// Classifies HLSL types and resource bindings. Compound aliases exist
    /// because patterns query subsets, not exact values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderTypes: u64 {
        const SCALAR = 1 << 1;
        const VECTOR = 1 << 2;
        const MATRIX = 1 << 3;
        const RESOURCE = 1 << 4;

        const ARRAY = 1 << 5;
        const CUBE = 1 << 6;

        const CONST_BUF = 1 << 7 | Self::RESOURCE.bits();
        const TEXTURE = 1 << 8 | Self::RESOURCE.bits();
        const BUFFER = 1 << 9 | Self::RESOURCE.bits();
        const SAMPLER = 1 << 10 | Self::RESOURCE.bits();

        const BOOL = 1 << 11;
        const INTEGER = 1 << 12;
        const UNSIGNED_INT = 1 << 13;
        const HALF = 1 << 14;
        const FLOAT = 1 << 15;
        const DOUBLE = 1 << 16;

        const MIN10 = 1 << 17;
        const MIN16 = 1 << 18;

        const READ_ONLY = 1 << 19;
        const RANDOM_RW = 1 << 20;
        const STRUCTURED = 1 << 21;
        const BYTE_ADDRESS = 1 << 22;

        const DIM1 = 1 << 23;
        const DIM2 = 1 << 24;
        const DIM3 = 1 << 25;
        const DIM4 = 1 << 26;

        const DIM_AX1 = 1 << 27;
        const DIM_AX2 = 1 << 28;
        const DIM_AX3 = 1 << 29;
        const DIM_AX4 = 1 << 30;

        const USER_TYPE = 1 << 31;
        const TEMPLATE = 1 << 32;

        const TEXTURE_1D = Self::TEXTURE.bits() | Self::DIM1.bits();
        const TEXTURE_2D = Self::TEXTURE.bits() | Self::DIM2.bits();
        const TEXTURE_3D = Self::TEXTURE.bits() | Self::DIM3.bits();

        const RW_TEXTURE_1D = Self::RANDOM_RW.bits() | Self::TEXTURE_1D.bits();
        const RW_TEXTURE_2D = Self::RANDOM_RW.bits() | Self::TEXTURE_2D.bits();
        const RW_TEXTURE_3D = Self::RANDOM_RW.bits() | Self::TEXTURE_3D.bits();

        const TEXTURE_1D_ARRAY = Self::TEXTURE_1D.bits() | Self::ARRAY.bits();
        const TEXTURE_2D_ARRAY = Self::TEXTURE_2D.bits() | Self::ARRAY.bits();

        const RW_TEXTURE_1D_ARRAY = Self::RW_TEXTURE_1D.bits() | Self::ARRAY.bits();
        const RW_TEXTURE_2D_ARRAY = Self::RW_TEXTURE_2D.bits() | Self::ARRAY.bits();

        const TEXTURE_CUBE = Self::TEXTURE.bits() | Self::CUBE.bits();
        const TEXTURE_CUBE_ARRAY = Self::TEXTURE_CUBE.bits() | Self::ARRAY.bits();

        const RW_BUFFER = Self::RANDOM_RW.bits() | Self::BUFFER.bits();
        const STRUCTURED_BUFFER = Self::STRUCTURED.bits() | Self::BUFFER.bits();
        const RW_STRUCTURED_BUFFER = Self::RANDOM_RW.bits() | Self::STRUCTURED_BUFFER.bits();
        const BYTE_ADDRESS_BUFFER = Self::BYTE_ADDRESS.bits() | Self::BUFFER.bits();
        const RW_BYTE_ADDRESS_BUFFER = Self::RANDOM_RW.bits() | Self::BYTE_ADDRESS_BUFFER.bits();
    }
}

/// Resolved type metadata for an intrinsic or user-declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderTypeInfo {
    pub name: String,
    pub flags: ShaderTypes,
    pub size: u32,
}

impl ShaderTypeInfo {
    pub fn has_flags(&self, flags: ShaderTypes) -> bool {
        self.flags.contains(flags)
    }
}

struct ScalarSpec {
    name: &'static str,
    flags: ShaderTypes,
    size: u32,
}

const SCALARS: &[ScalarSpec] = &[
    ScalarSpec { name: "bool", flags: ShaderTypes::BOOL, size: 4 },
    ScalarSpec { name: "int", flags: ShaderTypes::INTEGER, size: 4 },
    ScalarSpec { name: "uint", flags: ShaderTypes::UNSIGNED_INT, size: 4 },
    ScalarSpec { name: "dword", flags: ShaderTypes::UNSIGNED_INT, size: 4 },
    ScalarSpec { name: "half", flags: ShaderTypes::HALF, size: 4 },
    ScalarSpec { name: "float", flags: ShaderTypes::FLOAT, size: 4 },
    ScalarSpec { name: "double", flags: ShaderTypes::DOUBLE, size: 8 },
    ScalarSpec {
        name: "min16float",
        flags: ShaderTypes::MIN16.union(ShaderTypes::FLOAT),
        size: 4,
    },
    ScalarSpec {
        name: "min10float",
        flags: ShaderTypes::MIN10.union(ShaderTypes::FLOAT),
        size: 4,
    },
    ScalarSpec {
        name: "min16int",
        flags: ShaderTypes::MIN16.union(ShaderTypes::INTEGER),
        size: 4,
    },
    ScalarSpec {
        name: "min16uint",
        flags: ShaderTypes::MIN16.union(ShaderTypes::UNSIGNED_INT),
        size: 4,
    },
];

const RESOURCES: &[(&str, ShaderTypes)] = &[
    ("Texture1D", ShaderTypes::TEXTURE_1D),
    ("Texture1DArray", ShaderTypes::TEXTURE_1D_ARRAY),
    ("Texture2D", ShaderTypes::TEXTURE_2D),
    ("Texture2DArray", ShaderTypes::TEXTURE_2D_ARRAY),
    ("Texture3D", ShaderTypes::TEXTURE_3D),
    ("TextureCube", ShaderTypes::TEXTURE_CUBE),
    ("TextureCubeArray", ShaderTypes::TEXTURE_CUBE_ARRAY),
    ("RWTexture1D", ShaderTypes::RW_TEXTURE_1D),
    ("RWTexture1DArray", ShaderTypes::RW_TEXTURE_1D_ARRAY),
    ("RWTexture2D", ShaderTypes::RW_TEXTURE_2D),
    ("RWTexture2DArray", ShaderTypes::RW_TEXTURE_2D_ARRAY),
    ("RWTexture3D", ShaderTypes::RW_TEXTURE_3D),
    ("Buffer", ShaderTypes::BUFFER),
    ("RWBuffer", ShaderTypes::RW_BUFFER),
    ("StructuredBuffer", ShaderTypes::STRUCTURED_BUFFER),
    ("RWStructuredBuffer", ShaderTypes::RW_STRUCTURED_BUFFER),
    ("ByteAddressBuffer", ShaderTypes::BYTE_ADDRESS_BUFFER),
    ("RWByteAddressBuffer", ShaderTypes::RW_BYTE_ADDRESS_BUFFER),
    ("SamplerState", ShaderTypes::SAMPLER),
    ("SamplerComparisonState", ShaderTypes::SAMPLER),
    ("sampler", ShaderTypes::SAMPLER),
];

static INTRINSIC_TYPES: Lazy<FxHashMap<String, ShaderTypeInfo>> = Lazy::new(|| {
    const DIM_FLAGS: [ShaderTypes; 4] = [
        ShaderTypes::DIM1,
        ShaderTypes::DIM2,
        ShaderTypes::DIM3,
        ShaderTypes::DIM4,
    ];
    const AX_FLAGS: [ShaderTypes; 4] = [
        ShaderTypes::DIM_AX1,
        ShaderTypes::DIM_AX2,
        ShaderTypes::DIM_AX3,
        ShaderTypes::DIM_AX4,
    ];

    let mut map = FxHashMap::default();
    let mut add = |name: String, flags: ShaderTypes, size: u32| {
        map.insert(name.clone(), ShaderTypeInfo { name, flags, size });
    };

    add("void".to_string(), ShaderTypes::empty(), 0);

    for scalar in SCALARS {
        add(
            scalar.name.to_string(),
            scalar.flags | ShaderTypes::SCALAR,
            scalar.size,
        );

        for n in 1..=4u32 {
            add(
                format!("{}{}", scalar.name, n),
                scalar.flags | ShaderTypes::VECTOR | DIM_FLAGS[n as usize - 1],
                scalar.size * n,
            );

            for m in 1..=4u32 {
                add(
                    format!("{}{}x{}", scalar.name, n, m),
                    scalar.flags
                        | ShaderTypes::MATRIX
                        | DIM_FLAGS[n as usize - 1]
                        | AX_FLAGS[m as usize - 1],
                    scalar.size * n * m,
                );
            }
        }
    }

    // matrix/vector default to float4x4/float4
    add(
        "vector".to_string(),
        ShaderTypes::FLOAT | ShaderTypes::VECTOR | ShaderTypes::DIM4 | ShaderTypes::TEMPLATE,
        16,
    );
    add(
        "matrix".to_string(),
        ShaderTypes::FLOAT
            | ShaderTypes::MATRIX
            | ShaderTypes::DIM4
            | ShaderTypes::DIM_AX4
            | ShaderTypes::TEMPLATE,
        64,
    );

    for &(name, flags) in RESOURCES {
        add(name.to_string(), flags, 0);
    }

    map
});

/// Looks up the intrinsic type table by type name.
pub fn try_intrinsic_type(name: &str) -> Option<&'static ShaderTypeInfo> {
    INTRINSIC_TYPES.get(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsic_lookup() {
        let f3 = try_intrinsic_type("float3").unwrap();
        assert!(f3.has_flags(ShaderTypes::FLOAT | ShaderTypes::VECTOR | ShaderTypes::DIM3));
        assert_eq!(f3.size, 12);

        let m = try_intrinsic_type("float4x4").unwrap();
        assert!(m.has_flags(ShaderTypes::MATRIX));
        assert_eq!(m.size, 64);

        let tex = try_intrinsic_type("RWTexture2D").unwrap();
        assert!(tex.has_flags(ShaderTypes::RESOURCE | ShaderTypes::RANDOM_RW));

        assert!(try_intrinsic_type("float5").is_none());
        assert!(try_intrinsic_type("Vec3").is_none());
    }

    #[test]
    fn resource_subset_queries() {
        assert!(ShaderTypes::RW_STRUCTURED_BUFFER.contains(ShaderTypes::BUFFER));
        assert!(ShaderTypes::TEXTURE_CUBE_ARRAY.contains(ShaderTypes::TEXTURE));
        assert!(!ShaderTypes::SAMPLER.contains(ShaderTypes::TEXTURE));
    }
}
