//! Minimal line-directive preprocessor for WGSL filter sources.
//!
//! WGSL has no preprocessor, but graph files toggle shader features with
//! `defines`. Supported directives, each on its own line:
//!
//! - `#ifdef NAME` / `#ifndef NAME` / `#else` / `#endif` (nestable)
//! - `#error message` (fails compilation when reached)
//!
//! Defines whose value is numeric are also emitted as `const NAME = value;`
//! ahead of the source so shaders can read them.

use crate::compositor::Defines;

pub fn preprocess(source: &str, defines: &Defines) -> Result<String, String> {
    let mut out = String::with_capacity(source.len() + 64 * defines.len());

    for (name, value) in defines {
        if is_identifier(name) && is_number(value) {
            out.push_str(&format!("const {name} = {value};\n"));
        }
    }

    // Each frame: (branch active, parent active, saw #else).
    let mut stack: Vec<(bool, bool, bool)> = Vec::new();
    let active = |stack: &[(bool, bool, bool)]| stack.last().is_none_or(|f| f.0);

    for (index, line) in source.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim_start();

        let Some(directive) = trimmed.strip_prefix('#') else {
            if active(&stack) {
                out.push_str(line);
            }
            out.push('\n');
            continue;
        };

        let (keyword, arg) = match directive.split_once(char::is_whitespace) {
            Some((k, rest)) => (k, rest.trim()),
            None => (directive.trim(), ""),
        };

        match keyword {
            "ifdef" | "ifndef" => {
                if arg.is_empty() {
                    return Err(format!("line {line_no}: #{keyword} needs a name"));
                }
                let parent = active(&stack);
                let defined = defines.contains_key(arg);
                let taken = if keyword == "ifdef" { defined } else { !defined };
                stack.push((parent && taken, parent, false));
            }
            "else" => {
                let Some(frame) = stack.last_mut() else {
                    return Err(format!("line {line_no}: #else without #ifdef"));
                };
                if frame.2 {
                    return Err(format!("line {line_no}: duplicate #else"));
                }
                frame.0 = frame.1 && !frame.0;
                frame.2 = true;
            }
            "endif" => {
                if stack.pop().is_none() {
                    return Err(format!("line {line_no}: #endif without #ifdef"));
                }
            }
            "error" => {
                if active(&stack) {
                    return Err(format!("line {line_no}: #error {arg}"));
                }
            }
            _ => return Err(format!("line {line_no}: unknown directive #{keyword}")),
        }
        // Keep line numbers stable for naga diagnostics.
        out.push('\n');
    }

    if !stack.is_empty() {
        return Err("unterminated #ifdef".to_string());
    }
    Ok(out)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.parse::<f64>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defines(pairs: &[(&str, &str)]) -> Defines {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn branches_follow_defines() {
        let src = "a\n#ifdef FAST\nfast\n#else\nslow\n#endif\nb\n";
        let on = preprocess(src, &defines(&[("FAST", "")])).unwrap();
        let off = preprocess(src, &Defines::new()).unwrap();
        assert!(on.contains("fast") && !on.contains("slow"));
        assert!(off.contains("slow") && !off.contains("fast"));
    }

    #[test]
    fn nested_inactive_blocks_stay_inactive() {
        let src = "#ifdef A\n#ifndef B\nx\n#else\ny\n#endif\n#endif\n";
        let out = preprocess(src, &defines(&[("B", "")])).unwrap();
        assert!(!out.contains('x') && !out.contains('y'));
    }

    #[test]
    fn numeric_defines_become_consts() {
        let out = preprocess("body", &defines(&[("TAPS", "9"), ("MODE", "fancy")])).unwrap();
        assert!(out.starts_with("const TAPS = 9;\n"));
        assert!(!out.contains("MODE"));
    }

    #[test]
    fn error_directive_only_fires_when_active() {
        let src = "#ifdef BROKEN\n#error unsupported\n#endif\n";
        assert!(preprocess(src, &Defines::new()).is_ok());
        let err = preprocess(src, &defines(&[("BROKEN", "1")])).unwrap_err();
        assert!(err.contains("unsupported"));
    }

    #[test]
    fn unbalanced_blocks_are_rejected() {
        assert!(preprocess("#ifdef A\n", &Defines::new()).is_err());
        assert!(preprocess("#endif\n", &Defines::new()).is_err());
        assert!(preprocess("#pragma once\n", &Defines::new()).is_err());
    }

    #[test]
    fn line_count_is_preserved() {
        let src = "a\n#ifdef X\nb\n#endif\nc";
        let out = preprocess(src, &Defines::new()).unwrap();
        assert_eq!(out.lines().count(), src.lines().count());
    }
}
