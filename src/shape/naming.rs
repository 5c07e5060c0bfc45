//! Field Naming
//!
//! Derived field names are composed from member names with a separator
//! (`Product_ProductId`, `PaymentMethod_Cash`). When two fields of one shape
//! still collide, later fields are renamed in declaration order:
//! 1. prefix the owning member's display name; for inlined fields that is the
//!    enclosing members, innermost first, until unique
//! 2. then prefix the aggregate's display name
//! 3. then append a counter

use std::collections::HashSet;

use super::Field;

/// Join name parts with the separator
pub fn compose(parts: &[&str], separator: &str) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(separator)
}

/// Turn a display name into an identifier fragment (`"Ship to"` -> `"ShipTo"`)
pub fn to_identifier(display_name: &str) -> String {
    let mut result = String::with_capacity(display_name.len());
    let mut capitalize_next = true;

    for c in display_name.chars() {
        if c.is_alphanumeric() || c == '_' {
            if capitalize_next {
                result.extend(c.to_uppercase());
                capitalize_next = false;
            } else {
                result.push(c);
            }
        } else {
            capitalize_next = true;
        }
    }

    result
}

/// Rename later duplicates until every field name is unique
pub fn disambiguate(fields: &mut [Field], aggregate_name: &str, separator: &str) {
    let mut used: HashSet<String> = HashSet::with_capacity(fields.len());

    for field in fields.iter_mut() {
        if used.insert(field.name.clone()) {
            continue;
        }

        let owning: Vec<String> = if !field.qualifiers.is_empty() {
            field.qualifiers.iter().rev().cloned().collect()
        } else if field.member.is_some() {
            vec![to_identifier(&field.display_name)]
        } else {
            Vec::new()
        };

        let mut candidate = field.name.clone();
        let mut unique = false;
        for qualifier in &owning {
            candidate = compose(&[qualifier, &candidate], separator);
            if !used.contains(&candidate) {
                unique = true;
                break;
            }
        }

        if !unique {
            candidate = compose(&[&to_identifier(aggregate_name), &candidate], separator);
            unique = !used.contains(&candidate);
        }

        if !unique {
            let stem = candidate.clone();
            let mut counter = 2;
            loop {
                candidate = format!("{}{}{}", stem, separator, counter);
                if !used.contains(&candidate) {
                    break;
                }
                counter += 1;
            }
        }

        used.insert(candidate.clone());
        field.name = candidate;
    }
}
