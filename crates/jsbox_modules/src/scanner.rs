//! Import scanning
//!
//! A heuristic pass over guest source that lists the module specifiers it
//! references. It is not a parser: it only seeds the realm's import map, so
//! anything it cannot recognize is skipped rather than reported.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Quoted specifier in any of the three string forms. Template literals with
/// substitutions are filtered out after matching.
const QUOTED: &str = r#"(?:"([^"\n]*)"|'([^'\n]*)'|`([^`]*)`)"#;

static STATIC_IMPORT: Lazy<Regex> = Lazy::new(|| {
    let bindings = r"(?:[\w$]+\s*,?\s*)?(?:\*\s*as\s+[\w$]+|\{[^{}]*\})?";
    Regex::new(&format!(r"\bimport\b\s*(?:{bindings}\s*from\s*)?{QUOTED}"))
        .expect("static import pattern")
});

static DYNAMIC_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\bimport\s*\(\s*{QUOTED}\s*\)")).expect("dynamic import pattern")
});

static EXPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    let clause = r"(?:\*\s*(?:as\s+[\w$]+\s*)?|(?:type\s*)?\{[^{}]*\}\s*)";
    Regex::new(&format!(r"\bexport\s*{clause}from\s*{QUOTED}")).expect("export pattern")
});

/// Statements that only parse as module code: static `import`/`export` and
/// `import.meta`.
static MODULE_SYNTAX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"(?m)^[ \t]*(?:import\b\s*[\w$*{"'`]|export\b)"#,
        r"|\bimport\s*\.\s*meta\b",
    ))
    .expect("module syntax pattern")
});

/// A statement starting with `await`, or a declaration initialized by one.
/// Only counts outside every function body.
static STATEMENT_AWAIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:(?:const|let|var)\s+[^=\n]+=\s*)?await\b").expect("await pattern")
});

/// Keywords whose parenthesized head opens a plain block, not a function body
const BLOCK_KEYWORDS: [&str; 7] = ["if", "for", "while", "switch", "catch", "with", "await"];

/// Whether `source` must be evaluated as a module rather than a script.
///
/// Heuristic: the brace tracking knows arrow functions, `function` and
/// method heads, and control-flow blocks; braces inside template
/// substitutions or regex literals can mislead it.
pub fn has_module_syntax(source: &str) -> bool {
    let code = blank_comments(source);
    MODULE_SYNTAX.is_match(&code)
        || STATEMENT_AWAIT
            .find_iter(&code)
            .any(|found| !inside_function(&code, found.start()))
}

/// Whether byte offset `end` of `code` lies inside a function body.
fn inside_function(code: &str, end: usize) -> bool {
    let mut blocks: Vec<bool> = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (index, c) in code[..end].char_indices() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == open || (c == '\n' && open != '`') {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '{' => blocks.push(opens_function(&code[..index])),
            '}' => {
                blocks.pop();
            }
            _ => {}
        }
    }
    blocks.contains(&true)
}

/// Whether a `{` preceded by `head` starts a function body.
fn opens_function(head: &str) -> bool {
    let head = head.trim_end();
    if head.ends_with("=>") {
        return true;
    }
    let Some(params) = head.strip_suffix(')') else {
        return false;
    };

    let mut depth = 1;
    let mut open = None;
    for (index, byte) in params.bytes().enumerate().rev() {
        match byte {
            b')' => depth += 1,
            b'(' => {
                depth -= 1;
                if depth == 0 {
                    open = Some(index);
                    break;
                }
            }
            _ => {}
        }
    }
    let Some(open) = open else {
        return false;
    };

    let before = params[..open].trim_end();
    let word_start = before
        .rfind(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .map_or(0, |at| at + 1);
    !BLOCK_KEYWORDS.contains(&&before[word_start..])
}

/// Specifiers referenced by `source`, unique, in first-seen order.
pub fn scan_imports(source: &str) -> Vec<String> {
    let code = blank_comments(source);

    let mut found: Vec<(usize, String)> = Vec::new();
    for pattern in [&*STATIC_IMPORT, &*DYNAMIC_IMPORT, &*EXPORT_FROM] {
        for captures in pattern.captures_iter(&code) {
            let Some(start) = captures.get(0).map(|m| m.start()) else {
                continue;
            };
            if let Some(specifier) = quoted_specifier(&captures) {
                found.push((start, specifier));
            }
        }
    }
    found.sort_by_key(|(start, _)| *start);

    let mut specifiers: Vec<String> = Vec::with_capacity(found.len());
    for (_, specifier) in found {
        if !specifiers.contains(&specifier) {
            specifiers.push(specifier);
        }
    }
    specifiers
}

fn quoted_specifier(captures: &Captures<'_>) -> Option<String> {
    let text = (1..=3).find_map(|group| captures.get(group))?.as_str().trim();
    if text.is_empty() || text.contains("${") {
        return None;
    }
    Some(text.to_string())
}

#[derive(Clone, Copy)]
enum Lexeme {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

/// Replace comment text with spaces, leaving string literals intact so that
/// `'https://…'` survives. Newlines are preserved.
fn blank_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut state = Lexeme::Code;

    while let Some(c) = chars.next() {
        state = match state {
            Lexeme::Code => match (c, chars.peek()) {
                ('/', Some('/')) => {
                    chars.next();
                    out.push_str("  ");
                    Lexeme::LineComment
                }
                ('/', Some('*')) => {
                    chars.next();
                    out.push_str("  ");
                    Lexeme::BlockComment
                }
                ('\'' | '"' | '`', _) => {
                    out.push(c);
                    Lexeme::Quoted(c)
                }
                _ => {
                    out.push(c);
                    Lexeme::Code
                }
            },
            Lexeme::Quoted(quote) => {
                out.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                    Lexeme::Quoted(quote)
                } else if c == quote || (c == '\n' && quote != '`') {
                    Lexeme::Code
                } else {
                    Lexeme::Quoted(quote)
                }
            }
            Lexeme::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    Lexeme::Code
                } else {
                    out.push(' ');
                    Lexeme::LineComment
                }
            }
            Lexeme::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    Lexeme::Code
                } else {
                    out.push(if c == '\n' { '\n' } else { ' ' });
                    Lexeme::BlockComment
                }
            }
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_then_reexport_keeps_order() {
        assert_eq!(scan_imports("import a from 'x'; export * from 'y'"), vec!["x", "y"]);
    }

    #[test]
    fn unterminated_brace_is_skipped() {
        assert!(scan_imports("import {a from 'z'").is_empty());
    }

    #[test]
    fn missing_from_is_skipped() {
        assert!(scan_imports("import a 'x'").is_empty());
        assert!(scan_imports("import { a } 'x'").is_empty());
        assert!(scan_imports("export { a } 'x'").is_empty());
    }

    #[test]
    fn recognizes_every_import_form() {
        let source = r#"
            import def from "default-only";
            import * as ns from 'namespace';
            import { a, b as c } from 'named';
            import def2, { d } from 'default-and-named';
            import def3, * as ns2 from 'default-and-namespace';
            import 'side-effect';
            import {} from 'empty-braces';
        "#;
        assert_eq!(
            scan_imports(source),
            vec![
                "default-only",
                "namespace",
                "named",
                "default-and-named",
                "default-and-namespace",
                "side-effect",
                "empty-braces",
            ]
        );
    }

    #[test]
    fn recognizes_every_reexport_form() {
        let source = "export { x } from 'a';\nexport * from \"b\";\nexport * as y from `c`;";
        assert_eq!(scan_imports(source), vec!["a", "b", "c"]);
    }

    #[test]
    fn multi_line_statements_with_comments() {
        let source = r#"
            import {
                useState, // state hook
                /* effects */ useEffect,
            } from 'react';
            import /* inline */ confetti from
                "canvas-confetti";
        "#;
        assert_eq!(scan_imports(source), vec!["react", "canvas-confetti"]);
    }

    #[test]
    fn commented_out_imports_are_ignored() {
        let source = "// import a from 'gone'\n/* import b from 'also-gone' */\nimport c from 'kept'";
        assert_eq!(scan_imports(source), vec!["kept"]);
    }

    #[test]
    fn urls_inside_strings_are_not_comments() {
        let source = "import x from 'https://esm.sh/x'; import y from 'y'";
        assert_eq!(scan_imports(source), vec!["https://esm.sh/x", "y"]);
    }

    #[test]
    fn duplicates_keep_first_position() {
        let source = "import a from 'b'; import c from 'a'; export * from 'b'; import 'a'";
        assert_eq!(scan_imports(source), vec!["b", "a"]);
    }

    #[test]
    fn dynamic_literal_imports_are_included() {
        let source = "const m = await import('lazy'); import('./local.js'); import(name);";
        assert_eq!(scan_imports(source), vec!["lazy", "./local.js"]);
    }

    #[test]
    fn template_substitutions_are_skipped() {
        assert!(scan_imports("import(`pkg-${v}`)").is_empty());
    }

    #[test]
    fn lookalikes_do_not_match() {
        let source = "const important = 'x'; import.meta.url; obj.import = 1; reimport('y');";
        assert!(scan_imports(source).is_empty());
    }

    #[test]
    fn garbage_never_panics() {
        for source in ["", "import", "import '", "export * from", "/*", "'", "`", "import {{{ from 'x'", "\\"] {
            let _ = scan_imports(source);
        }
    }

    #[test]
    fn detects_module_syntax() {
        assert!(has_module_syntax("import a from 'x';"));
        assert!(has_module_syntax("import 'side-effect';"));
        assert!(has_module_syntax("  import { a } from 'x'"));
        assert!(has_module_syntax("export default 42;"));
        assert!(has_module_syntax("const x = 1;\nexport { x };"));
        assert!(has_module_syntax("console.log(import.meta.url)"));
        assert!(has_module_syntax("await Promise.resolve(1);"));
        assert!(has_module_syntax("const data = await load();"));
    }

    #[test]
    fn plain_scripts_are_not_modules() {
        assert!(!has_module_syntax("1 + 1"));
        assert!(!has_module_syntax("'use strict'; const x = 'import a from b';"));
        assert!(!has_module_syntax("import('lazy').then(m => m.default)"));
        assert!(!has_module_syntax("// export default 1\nconsole.log('hi')"));
        assert!(!has_module_syntax("async function f() {\n  await g();\n}"));
        assert!(!has_module_syntax("async function f() {\nawait g();\n}\nf(); 1"));
        assert!(!has_module_syntax("const run = async () => {\nconst v = await g();\n};"));
        assert!(!has_module_syntax("class A {\n  async load() {\n    await g();\n  }\n}"));
        assert!(has_module_syntax("if (ready) {\n  await start();\n}"));
        assert!(has_module_syntax("const f = () => { return '}'; };\nawait f();"));
        assert!(!has_module_syntax("const exported = true;"));
    }

    #[test]
    fn blanking_preserves_lines() {
        let blanked = blank_comments("a // b\nc /* d\ne */ f");
        assert_eq!(blanked.lines().count(), 3);
        assert!(!blanked.contains('b'));
        assert!(!blanked.contains('d'));
        assert!(blanked.contains('f'));
    }
}
