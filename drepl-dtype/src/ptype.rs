use std::fmt::{Display, Formatter};
use std::str::FromStr;

use drepl_error::{DreplError, drepl_err};

/// Physical type of a fixed-width scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub enum PType {
    /// An 8-bit signed integer
    I8,
    /// A 16-bit signed integer
    I16,
    /// A 32-bit signed integer
    I32,
    /// A 64-bit signed integer
    I64,
    /// An 8-bit unsigned integer
    U8,
    /// A 16-bit unsigned integer
    U16,
    /// A 32-bit unsigned integer
    U32,
    /// A 64-bit unsigned integer
    U64,
    /// A 32-bit IEEE 754 float
    F32,
    /// A 64-bit IEEE 754 float
    F64,
}

impl PType {
    /// Width of one value in bytes.
    pub const fn byte_width(&self) -> u64 {
        match self {
            PType::I8 | PType::U8 => 1,
            PType::I16 | PType::U16 => 2,
            PType::I32 | PType::U32 | PType::F32 => 4,
            PType::I64 | PType::U64 | PType::F64 => 8,
        }
    }

    /// Name used in dataset descriptions.
    pub const fn name(&self) -> &'static str {
        match self {
            PType::I8 => "int8",
            PType::I16 => "int16",
            PType::I32 => "int32",
            PType::I64 => "int64",
            PType::U8 => "uint8",
            PType::U16 => "uint16",
            PType::U32 => "uint32",
            PType::U64 => "uint64",
            PType::F32 => "float32",
            PType::F64 => "float64",
        }
    }
}

impl Display for PType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for PType {
    type Err = DreplError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "int8" => PType::I8,
            "int16" => PType::I16,
            "int32" => PType::I32,
            "int64" => PType::I64,
            "uint8" => PType::U8,
            "uint16" => PType::U16,
            "uint32" => PType::U32,
            "uint64" => PType::U64,
            "float32" => PType::F32,
            "float64" => PType::F64,
            _ => return Err(drepl_err!("unknown primitive type '{s}'")),
        })
    }
}

impl TryFrom<String> for PType {
    type Error = DreplError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PType> for String {
    fn from(value: PType) -> Self {
        value.name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("int8", PType::I8, 1)]
    #[case("uint16", PType::U16, 2)]
    #[case("float32", PType::F32, 4)]
    #[case("int64", PType::I64, 8)]
    fn parse_primitive(#[case] name: &str, #[case] ptype: PType, #[case] width: u64) {
        let parsed: PType = name.parse().unwrap();
        assert_eq!(parsed, ptype);
        assert_eq!(parsed.byte_width(), width);
        assert_eq!(parsed.to_string(), name);
    }

    #[test]
    fn unknown_primitive() {
        assert!("int128".parse::<PType>().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_uses_description_names() {
        let ptype: PType = serde_json::from_str("\"float64\"").unwrap();
        assert_eq!(ptype, PType::F64);
        assert_eq!(serde_json::to_string(&PType::U8).unwrap(), "\"uint8\"");
    }
}
