use super::{ContentPlugin, PluginContext};
use crate::error::{Error, Result};
use crate::storage::models::TokenPos;
use crate::storage::Store;
use rustpython_parser::lexer::lex;
use rustpython_parser::source_code::LineIndex;
use rustpython_parser::{Mode, Tok};
use std::fs;
use tracing::debug;

const EXTENSIONS: &[&str] = &["py", "pyw"];

/// Token type recorded for identifiers (Python's `token.NAME`).
pub const NAME_TOKEN: i64 = 1;

/// Indexes every non-keyword identifier in Python source files.
pub struct PythonIdentifiers;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub name: String,
    /// 1-based.
    pub line: i64,
    /// 0-based character column.
    pub pos: i64,
}

/// Identifiers lexed before the end of the source or the first lexical
/// error, whichever came first.
#[derive(Debug, Default)]
pub struct Extraction {
    pub identifiers: Vec<Identifier>,
    pub error: Option<String>,
}

impl ContentPlugin for PythonIdentifiers {
    fn name(&self) -> &str {
        "python-identifiers"
    }

    fn process(&self, store: &dyn Store, ctx: &PluginContext<'_>) -> Result<()> {
        let is_python = ctx
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| EXTENSIONS.contains(&e))
            .unwrap_or(false);
        if !is_python {
            return Ok(());
        }

        let bytes = fs::read(ctx.path)?;
        let source = String::from_utf8_lossy(&bytes);
        let extraction = extract_identifiers(&source);
        debug!(
            "{} identifiers in {}",
            extraction.identifiers.len(),
            ctx.path.display()
        );
        for ident in extraction.identifiers {
            store.save_token(
                ctx.content,
                &TokenPos {
                    id: 0,
                    checksum_id: ctx.content.id,
                    ttype: NAME_TOKEN,
                    name: ident.name,
                    line: ident.line,
                    pos: ident.pos,
                },
            )?;
        }

        match extraction.error {
            Some(message) => Err(Error::Plugin {
                plugin: self.name().to_string(),
                message: format!("{}: {}", ctx.path.display(), message),
            }),
            None => Ok(()),
        }
    }
}

/// Non-keyword names in source order. Comments, string literals and numbers
/// never produce names; soft keywords count as names where Python treats
/// them as such.
pub fn extract_identifiers(source: &str) -> Extraction {
    let index = LineIndex::from_source_text(source);
    let mut extraction = Extraction::default();

    for result in lex(source, Mode::Module) {
        match result {
            Ok((Tok::Name { name }, range)) => {
                let location = index.source_location(range.start(), source);
                extraction.identifiers.push(Identifier {
                    name: name.to_string(),
                    line: location.row.get() as i64,
                    pos: location.column.to_zero_indexed() as i64,
                });
            }
            Ok(_) => {}
            Err(e) => {
                let location = index.source_location(e.location, source);
                extraction.error = Some(format!(
                    "{} at line {}, column {}",
                    e.error,
                    location.row.get(),
                    location.column.to_zero_indexed()
                ));
                break;
            }
        }
    }

    extraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::path::Path;
    use tempfile::tempdir;

    fn names(source: &str) -> Vec<String> {
        let extraction = extract_identifiers(source);
        assert_eq!(extraction.error, None);
        extraction.identifiers.into_iter().map(|i| i.name).collect()
    }

    #[test]
    fn test_keywords_are_skipped() {
        assert_eq!(
            names("def spam(eggs):\n    return eggs is None\n"),
            vec!["spam", "eggs", "eggs"]
        );
    }

    #[test]
    fn test_positions() {
        let idents = extract_identifiers("import os\nx = os.path\n").identifiers;
        assert_eq!(
            idents,
            vec![
                Identifier { name: "os".into(), line: 1, pos: 7 },
                Identifier { name: "x".into(), line: 2, pos: 0 },
                Identifier { name: "os".into(), line: 2, pos: 4 },
                Identifier { name: "path".into(), line: 2, pos: 7 },
            ]
        );
    }

    #[test]
    fn test_strings_and_comments_are_ignored() {
        let source = "a = 'b c'  # d e\nf = \"\"\"g\nh\"\"\"\ni = rb'j' + f\"{k}\"\n";
        assert_eq!(names(source), vec!["a", "f", "i"]);
        let last = extract_identifiers(source).identifiers.pop().unwrap();
        assert_eq!((last.line, last.pos), (4, 0));
    }

    #[test]
    fn test_numbers_are_not_names() {
        assert_eq!(names("y = 1e-5 + 0x1F + .5j + z2\n"), vec!["y", "z2"]);
    }

    #[test]
    fn test_unicode_identifiers_use_character_columns() {
        let idents = extract_identifiers("é = ñandú\n").identifiers;
        assert_eq!(idents[1], Identifier { name: "ñandú".into(), line: 1, pos: 4 });
    }

    #[test]
    fn test_lexical_error_keeps_earlier_names() {
        let extraction = extract_identifiers("x = 1\ny = 'unterminated\nz = 2\n");
        let found: Vec<&str> = extraction.identifiers.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(found, vec!["x", "y"]);
        assert!(extraction.error.unwrap().contains("line 2"));
    }

    #[test]
    fn test_lexical_error_is_a_plugin_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.py");
        fs::write(&path, "ok = 1\nbad = 'oops\n").unwrap();

        let store = MemoryStore::new();
        let content = store.insert_checksum("broken").unwrap().into_record();
        let ctx = PluginContext { path: &path, content: &content };

        let result = PythonIdentifiers.process(&store, &ctx);
        assert!(matches!(result, Err(Error::Plugin { .. })));
        let saved: Vec<String> = store
            .tokens_for("broken")
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(saved, vec!["ok", "bad"]);
    }

    #[test]
    fn test_other_extensions_are_left_alone() {
        let store = MemoryStore::new();
        let content = store.insert_checksum("txt").unwrap().into_record();
        let ctx = PluginContext {
            path: Path::new("/does/not/exist.txt"),
            content: &content,
        };
        PythonIdentifiers.process(&store, &ctx).unwrap();
        assert!(store.tokens_for("txt").unwrap().is_empty());
    }
}
