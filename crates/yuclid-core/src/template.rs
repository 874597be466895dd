use std::path::Path;

use crate::space::{render_value, Point, Space};

const PREFIX: &str = "${yuclid.";

/// Single left-to-right pass over `input`, rewriting `${yuclid.<token>}`
/// occurrences the resolver answers for and leaving the rest verbatim.
/// Substituted text is never rescanned, so expansion cannot recurse.
fn substitute<F>(input: &str, mut resolve: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find(PREFIX) {
        out.push_str(&rest[..start]);
        let after = &rest[start + PREFIX.len()..];
        match after.find('}') {
            Some(end) => {
                let token = &after[..end];
                match resolve(token) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&rest[start..start + PREFIX.len() + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated placeholder; keep the tail as-is.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Resolves `${yuclid.<dim>.values}` and `${yuclid.<dim>.names}` against the
/// whole space: whitespace-joined raw values and display names.
pub fn substitute_global(input: &str, space: &Space) -> String {
    substitute(input, |token| {
        if let Some(dim) = token.strip_suffix(".values") {
            space.get(dim).map(|d| {
                d.values
                    .iter()
                    .map(|v| render_value(&v.value))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
        } else if let Some(dim) = token.strip_suffix(".names") {
            space.get(dim).map(|d| {
                d.values
                    .iter()
                    .map(|v| v.name.clone())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
        } else {
            None
        }
    })
}

/// Resolves `${yuclid.<dim>}` from the point and `${yuclid.@}` to the cache
/// directory joined with the trial identifier.
pub fn substitute_point(input: &str, point: &Point, point_id: &str, cache_dir: &Path) -> String {
    substitute(input, |token| {
        if token == "@" {
            Some(cache_dir.join(point_id).to_string_lossy().to_string())
        } else if token.contains('.') {
            None
        } else {
            point.get(token).map(|v| render_value(&v.value))
        }
    })
}

/// Placeholders still present after substitution. They are left verbatim in
/// the command (fail-open) but callers report them as warnings.
pub fn unresolved_placeholders(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find(PREFIX) {
        let after = &rest[start + PREFIX.len()..];
        match after.find('}') {
            Some(end) => {
                tokens.push(after[..end].to_string());
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::Space;
    use serde_json::json;
    use std::path::PathBuf;

    fn space() -> Space {
        let doc = json!({
            "threads": [1, 2, 4, 8],
            "opt": ["O2", {"name": "fast", "value": "O3 -ffast-math"}]
        });
        Space::from_document(doc.as_object().expect("object")).expect("space")
    }

    fn point(space: &Space) -> Point {
        let order: Vec<String> = vec!["threads".into(), "opt".into()];
        crate::space::points(space, &order).next().expect("point")
    }

    #[test]
    fn global_values_join_with_whitespace() {
        let space = space();
        let out = substitute_global("run ${yuclid.threads.values}", &space);
        assert_eq!(out, "run 1 2 4 8");
    }

    #[test]
    fn global_names_use_display_names() {
        let space = space();
        let out = substitute_global("for x in ${yuclid.opt.names}", &space);
        assert_eq!(out, "for x in O2 fast");
    }

    #[test]
    fn point_placeholders_resolve_to_raw_values() {
        let space = space();
        let p = point(&space);
        let out = substitute_point(
            "bench -t ${yuclid.threads} -O '${yuclid.opt}'",
            &p,
            "yuclid.00000000.tmp",
            Path::new(".yuclid"),
        );
        assert_eq!(out, "bench -t 1 -O 'O2'");
    }

    #[test]
    fn at_placeholder_joins_cache_dir_and_trial_id() {
        let space = space();
        let p = point(&space);
        let out = substitute_point(
            "cat ${yuclid.@}",
            &p,
            "yuclid.0000000a.tmp",
            Path::new("/tmp/cache"),
        );
        assert_eq!(
            out,
            format!("cat {}", PathBuf::from("/tmp/cache/yuclid.0000000a.tmp").display())
        );
    }

    #[test]
    fn unresolved_placeholders_stay_verbatim() {
        let space = space();
        let p = point(&space);
        let global = substitute_global("x ${yuclid.missing.values} y", &space);
        assert_eq!(global, "x ${yuclid.missing.values} y");
        let out = substitute_point(&global, &p, "id", Path::new("."));
        assert_eq!(out, "x ${yuclid.missing.values} y");
        assert_eq!(unresolved_placeholders(&out), vec!["missing.values"]);
    }

    #[test]
    fn substitution_is_not_recursive() {
        let doc = json!({"cmd": [{"name": "loop", "value": "${yuclid.cmd}"}]});
        let space = Space::from_document(doc.as_object().expect("object")).expect("space");
        let order = vec!["cmd".to_string()];
        let p = crate::space::points(&space, &order).next().expect("point");
        let out = substitute_point("${yuclid.cmd}", &p, "id", Path::new("."));
        assert_eq!(out, "${yuclid.cmd}");
        assert_eq!(unresolved_placeholders(&out), vec!["cmd"]);
    }

    #[test]
    fn unterminated_placeholder_is_kept() {
        let space = space();
        let p = point(&space);
        let out = substitute_point("echo ${yuclid.threads", &p, "id", Path::new("."));
        assert_eq!(out, "echo ${yuclid.threads");
    }
}
