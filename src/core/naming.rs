//! Name conversion between Rust-style camelCase/PascalCase identifiers and
//! underscore-separated SQL names.

/// Resolve the SQL name for a type or field: the explicit override wins when
/// present and non-blank, otherwise the default name is converted to
/// underscore-separated lower case.
pub fn sql_name(default_name: &str, given_name: Option<&str>) -> String {
    if let Some(given) = given_name {
        let given = given.trim();
        if !given.is_empty() {
            return given.to_string();
        }
    }
    camel_case_to_underscore(default_name)
}

/// Convert a camelCase string to lower_case, inserting one underscore before
/// every upper-case character (so a run of capitals becomes `_t_e_s_t`).
pub fn camel_case_to_underscore(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_uppercase() {
            if !result.is_empty() {
                result.push('_');
            }
            result.extend(ch.to_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}

/// Convert an underscore-separated string to camelCase. The character after
/// each removed underscore is shifted to upper case; an underscore with no
/// following letter is dropped, and a doubled underscore collapses to one.
pub fn underscore_to_camel_case(name: &str) -> String {
    let Some(first) = name.find('_') else {
        return name.to_string();
    };
    let mut chars: Vec<char> = name.chars().collect();
    // char index of the first underscore; safe since '_' is single-byte
    let mut i = name[..first].chars().count();
    while i < chars.len() {
        if chars[i] == '_' {
            chars.remove(i);
            if i < chars.len() {
                chars[i] = chars[i].to_ascii_uppercase();
            }
            // the scan moves past the shifted character, so a second
            // consecutive underscore is kept as-is
        }
        i += 1;
    }
    chars.into_iter().collect()
}
