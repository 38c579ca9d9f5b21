//! Source-to-source rewrite applied before every evaluation
//!
//! Unparseable input is returned untouched; the engine reports the syntax
//! error when it runs it.

use oxc_allocator::Allocator;
use oxc_ast::ast::{BindingPatternKind, Statement, VariableDeclaration};
use oxc_parser::{ParseOptions, Parser};
use oxc_span::{GetSpan, SourceType, Span};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

struct Splice {
    span: Span,
    text: String,
}

fn slice(source: &str, span: Span) -> &str {
    &source[span.start as usize..span.end as usize]
}

/// Rewrite a script so its top-level bindings survive the call and its
/// trailing expression becomes the result.
pub fn normalize(source: &str) -> String {
    let allocator = Allocator::default();
    let options = ParseOptions { allow_return_outside_function: true, ..ParseOptions::default() };
    let parsed = Parser::new(&allocator, source, SourceType::default().with_module(false))
        .with_options(options)
        .parse();

    if parsed.panicked || !parsed.errors.is_empty() {
        debug!(errors = parsed.errors.len(), "script did not parse, leaving it as is");
        return source.to_string();
    }

    let program = &parsed.program;
    let mut splices = Vec::new();

    for statement in program.body.iter() {
        if let Statement::VariableDeclaration(decl) = statement {
            splices.push(Splice { span: decl.span, text: promote(source, decl) });
        }
    }

    let has_return = program.body.iter().any(|s| matches!(s, Statement::ReturnStatement(_)));
    if !has_return {
        match program.body.last() {
            Some(Statement::ExpressionStatement(stmt)) => splices.push(Splice {
                span: stmt.span,
                text: format!("return ({})", slice(source, stmt.expression.span())),
            }),
            // A bare string literal script parses as a directive.
            None => {
                if let Some(directive) = program.directives.last() {
                    splices.push(Splice {
                        span: directive.span,
                        text: format!("return ({})", slice(source, directive.expression.span)),
                    });
                }
            }
            Some(_) => {}
        }
    }

    splices.sort_by(|a, b| b.span.start.cmp(&a.span.start));
    let mut out = source.to_string();
    for splice in splices {
        out.replace_range(splice.span.start as usize..splice.span.end as usize, &splice.text);
    }
    out
}

fn promote(source: &str, decl: &VariableDeclaration<'_>) -> String {
    let keyword = decl
        .declarations
        .first()
        .map(|first| source[decl.span.start as usize..first.span.start as usize].trim())
        .unwrap_or("var");

    decl.declarations
        .iter()
        .map(|declarator| match &declarator.id.kind {
            BindingPatternKind::BindingIdentifier(ident) => {
                let init = declarator
                    .init
                    .as_ref()
                    .map(|expr| slice(source, expr.span()))
                    .unwrap_or("undefined");
                format!("globalThis.{} = {};", ident.name, init)
            }
            _ => format!("{} {};", keyword, slice(source, declarator.span)),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn fence() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?is)^```(?:javascript|typescript|js|ts)?[ \t]*\r?\n(.*?)\s*```$").ok())
        .as_ref()
}

/// Strip one surrounding markdown code fence from model output.
pub fn extract_script_candidate(text: &str) -> String {
    let trimmed = text.trim();
    match fence().and_then(|re| re.captures(trimmed)).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().to_string(),
        None => trimmed.to_string(),
    }
}
