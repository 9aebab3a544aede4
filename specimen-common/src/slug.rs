//! URI-friendly resource names
//!
//! Resources are addressed as `<external id>-<uri name>`, e.g.
//! `PqrX9-manhattan`. Only the external id part is significant; the name is
//! there for humans.

/// Render `name` as lowercase ASCII letters, digits, `.` and `-`, with every
/// other character turned into `-` and runs of `-` collapsed.
pub fn uri_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_alphanumeric() || c == '.' {
            c
        } else {
            '-'
        };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    out
}

/// `PqrX9` + `Manhattan` -> `PqrX9-manhattan`
pub fn resource_ref(external_id: &str, name: &str) -> String {
    format!("{}-{}", external_id, uri_name(name))
}

/// External id part of a resource reference; a bare id is returned as is
pub fn split_resource_ref(reference: &str) -> &str {
    reference.split('-').next().unwrap_or(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_name() {
        let cases = [
            ("foobar", "foobar"),
            ("fooBar", "foobar"),
            ("foo bar", "foo-bar"),
            ("f o o", "f-o-o"),
            ("foo   bar", "foo-bar"),
            ("foo ~ bar", "foo-bar"),
            ("a_b/c", "a-b-c"),
            ("X-ray tomography", "x-ray-tomography"),
            ("scan.v2", "scan.v2"),
            ("café au lait", "caf-au-lait"),
        ];
        for (input, expected) in cases {
            assert_eq!(uri_name(input), expected, "input {:?}", input);
        }
    }

    #[test]
    fn test_resource_ref_round_trip() {
        let reference = resource_ref("PqrX9", "Manhattan");
        assert_eq!(reference, "PqrX9-manhattan");
        assert_eq!(split_resource_ref(&reference), "PqrX9");
        assert_eq!(split_resource_ref("OQn6Q"), "OQn6Q");
    }
}
