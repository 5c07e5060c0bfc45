//! Type Mapping Table
//!
//! Maps primitive scalar types to type names in the two output languages:
//! - [`OutputLanguage::CSharp`]: the class-based backend language
//! - [`OutputLanguage::TypeScript`]: the browser UI language
//!
//! Enums map to a named type on the backend and to a string-literal union
//! in the browser.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Primitive Types
// =============================================================================

/// Scalar primitive type of a member or field
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveType {
    String,
    Bool,
    Int,
    Decimal,
    /// Date-time
    Date,
    /// Named enum type
    Enum(String),
}

impl PrimitiveType {
    /// Resolve a built-in scalar type tag (`enum` names are resolved by the parser)
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "string" | "word" | "sentence" | "uuid" => Some(Self::String),
            "bool" => Some(Self::Bool),
            "int" => Some(Self::Int),
            "decimal" => Some(Self::Decimal),
            "date" | "datetime" => Some(Self::Date),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Decimal)
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Decimal => write!(f, "decimal"),
            Self::Date => write!(f, "date"),
            Self::Enum(name) => write!(f, "{}", name),
        }
    }
}

// =============================================================================
// Output Languages
// =============================================================================

/// Target language of an emitter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLanguage {
    /// Output language A
    CSharp,
    /// Output language B
    TypeScript,
}

impl std::str::FromStr for OutputLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" | "csharp" | "cs" => Ok(Self::CSharp),
            "b" | "typescript" | "ts" => Ok(Self::TypeScript),
            other => Err(format!("unknown output language '{}'", other)),
        }
    }
}

/// A mapped type name plus the suffix that marks it nullable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedType {
    pub type_name: String,
    pub nullable_suffix: String,
}

impl MappedType {
    /// Type name with the nullable suffix applied when `nullable`
    pub fn render(&self, nullable: bool) -> String {
        if nullable {
            format!("{}{}", self.type_name, self.nullable_suffix)
        } else {
            self.type_name.clone()
        }
    }
}

/// Map a primitive to an output-language type name.
///
/// `enum_values` lists the value names of the enum when `primitive` is an
/// enum; it is ignored otherwise.
pub fn map_primitive_type(
    primitive: &PrimitiveType,
    language: OutputLanguage,
    enum_values: &[String],
) -> MappedType {
    let type_name = match (language, primitive) {
        (OutputLanguage::CSharp, PrimitiveType::String) => "string".to_string(),
        (OutputLanguage::CSharp, PrimitiveType::Bool) => "bool".to_string(),
        (OutputLanguage::CSharp, PrimitiveType::Int) => "int".to_string(),
        (OutputLanguage::CSharp, PrimitiveType::Decimal) => "decimal".to_string(),
        (OutputLanguage::CSharp, PrimitiveType::Date) => "DateTime".to_string(),
        (OutputLanguage::CSharp, PrimitiveType::Enum(name)) => name.clone(),

        (OutputLanguage::TypeScript, PrimitiveType::String) => "string".to_string(),
        (OutputLanguage::TypeScript, PrimitiveType::Bool) => "boolean".to_string(),
        (OutputLanguage::TypeScript, PrimitiveType::Int)
        | (OutputLanguage::TypeScript, PrimitiveType::Decimal) => "number".to_string(),
        (OutputLanguage::TypeScript, PrimitiveType::Date) => "string".to_string(),
        (OutputLanguage::TypeScript, PrimitiveType::Enum(_)) => {
            if enum_values.is_empty() {
                "never".to_string()
            } else {
                enum_values
                    .iter()
                    .map(|v| format!("'{}'", v.replace('\'', "\\'")))
                    .collect::<Vec<_>>()
                    .join(" | ")
            }
        }
    };

    let nullable_suffix = match language {
        OutputLanguage::CSharp => "?",
        OutputLanguage::TypeScript => " | undefined",
    };

    MappedType {
        type_name,
        nullable_suffix: nullable_suffix.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_mapping() {
        let mapped = map_primitive_type(&PrimitiveType::Date, OutputLanguage::CSharp, &[]);
        assert_eq!(mapped.type_name, "DateTime");
        assert_eq!(mapped.render(true), "DateTime?");

        let status = PrimitiveType::Enum("OrderStatus".to_string());
        let mapped = map_primitive_type(&status, OutputLanguage::CSharp, &[]);
        assert_eq!(mapped.render(false), "OrderStatus");
    }

    #[test]
    fn test_browser_mapping() {
        let mapped = map_primitive_type(&PrimitiveType::Decimal, OutputLanguage::TypeScript, &[]);
        assert_eq!(mapped.render(true), "number | undefined");

        let status = PrimitiveType::Enum("OrderStatus".to_string());
        let values = vec!["Open".to_string(), "Closed".to_string()];
        let mapped = map_primitive_type(&status, OutputLanguage::TypeScript, &values);
        assert_eq!(mapped.type_name, "'Open' | 'Closed'");
    }

    #[test]
    fn test_from_tag() {
        assert_eq!(PrimitiveType::from_tag("word"), Some(PrimitiveType::String));
        assert_eq!(PrimitiveType::from_tag("datetime"), Some(PrimitiveType::Date));
        assert_eq!(PrimitiveType::from_tag("Status"), None);
        assert_eq!("b".parse::<OutputLanguage>(), Ok(OutputLanguage::TypeScript));
    }
}
