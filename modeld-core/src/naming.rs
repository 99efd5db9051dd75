//! Key-casing transform for the open-ended parts of backend records.

/// Converts a camelCase or PascalCase key to snake_case.
///
/// An underscore is inserted before every uppercase letter that is not at
/// the start of the string, then the whole key is lowercased:
/// `PredictorReady` → `predictor_ready`, `IngressReady` → `ingress_ready`.
/// Runs of capitals are split letter by letter (`URL` → `u_r_l`).
pub fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (index, ch) in key.chars().enumerate() {
        if ch.is_ascii_uppercase() && index > 0 {
            out.push('_');
        }
        out.push(ch.to_ascii_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_types() {
        assert_eq!(to_snake_case("Ready"), "ready");
        assert_eq!(to_snake_case("PredictorReady"), "predictor_ready");
        assert_eq!(to_snake_case("LatestDeploymentReady"), "latest_deployment_ready");
    }

    #[test]
    fn test_already_snake_and_acronyms() {
        assert_eq!(to_snake_case("storage_uri"), "storage_uri");
        assert_eq!(to_snake_case("storageUri"), "storage_uri");
        assert_eq!(to_snake_case("URL"), "u_r_l");
        assert_eq!(to_snake_case(""), "");
    }
}
