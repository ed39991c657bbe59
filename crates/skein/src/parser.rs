//! Source parsing.
//!
//! Thin wrapper over the swc parser (via `deno_ast`). All modules share
//! one `SourceMap` so spans stay meaningful across the whole bundle run
//! and diagnostics can carry `uri:line:col` positions.

use deno_ast::swc::{
    ast::{EsVersion, Expr, Module},
    common::{comments::SingleThreadedComments, sync::Lrc, FileName, SourceMap, Spanned},
    parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax, TsSyntax},
};

use crate::errors::{BundleError, Result};

/// Pick the parse syntax from the URI's extension. TypeScript is the
/// default: the runtime's own sources are `.ts`, and remote registries
/// serve extensionless TS endpoints.
pub fn syntax_for_uri(uri: &str) -> Syntax {
    let path = uri.split('?').next().unwrap_or(uri);
    if path.ends_with(".js") || path.ends_with(".mjs") || path.ends_with(".cjs") {
        Syntax::Es(EsSyntax::default())
    } else if path.ends_with(".jsx") {
        Syntax::Es(EsSyntax {
            jsx: true,
            ..EsSyntax::default()
        })
    } else if path.ends_with(".tsx") {
        Syntax::Typescript(TsSyntax {
            tsx: true,
            ..ts_syntax()
        })
    } else {
        Syntax::Typescript(ts_syntax())
    }
}

fn ts_syntax() -> TsSyntax {
    TsSyntax {
        tsx: false,
        decorators: true,
        dts: false,
        no_early_errors: true,
        disallow_ambiguous_jsx_like: false,
    }
}

/// Parse a module's source text into an AST, registering it in the shared
/// source map under its URI.
pub fn parse_module(source_map: &Lrc<SourceMap>, uri: &str, source: &str) -> Result<Module> {
    let file = source_map.new_source_file(
        FileName::Custom(uri.to_string()).into(),
        source.to_string(),
    );

    let comments = SingleThreadedComments::default();
    let lexer = Lexer::new(
        syntax_for_uri(uri),
        EsVersion::EsNext,
        StringInput::from(&*file),
        Some(&comments),
    );
    let mut parser = Parser::new_from(lexer);

    let module = parser
        .parse_module()
        .map_err(|e| parse_error(source_map, uri, e))?;

    if let Some(recovered) = parser.take_errors().into_iter().next() {
        return Err(parse_error(source_map, uri, recovered));
    }

    Ok(module)
}

/// Parse a bare expression snippet (macro expansion results).
pub fn parse_expr_snippet(source_map: &Lrc<SourceMap>, label: &str, code: &str) -> Result<Box<Expr>> {
    let file = source_map.new_source_file(
        FileName::Custom(label.to_string()).into(),
        code.to_string(),
    );

    let lexer = Lexer::new(
        Syntax::Typescript(ts_syntax()),
        EsVersion::EsNext,
        StringInput::from(&*file),
        None,
    );
    let mut parser = Parser::new_from(lexer);
    parser
        .parse_expr()
        .map_err(|e| parse_error(source_map, label, e))
}

fn parse_error(
    source_map: &Lrc<SourceMap>,
    uri: &str,
    error: deno_ast::swc::parser::error::Error,
) -> BundleError {
    let loc = source_map.lookup_char_pos(error.span().lo());
    BundleError::Parse {
        uri: uri.to_string(),
        line: loc.line,
        col: loc.col_display + 1,
        message: error.into_kind().msg().to_string(),
    }
}
