//! RcDoc-based pretty-printer with termcolor annotations for [`Term`].
//!
//! Role
//! - Convert a `Term` into an annotated document suitable for width-aware rendering.
//! - Provide colored output for terminals (TTY-aware) and plain strings
//!   for logs and reports.
//!
//! Syntax
//! - The printed form is the concrete syntax accepted by [`crate::parser::parse_term`];
//!   parentheses are only emitted where precedence requires them.

use std::io::{self, Write};

use pretty::{FmtWrite, RcDoc, RenderAnnotated};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::sort::Value;
use crate::term::{Term, TermNode, TermType};
use crate::variable::{Side, Variable};

/// Styles used to annotate parts of the pretty-printed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    /// Parentheses are colored by nesting depth so matching pairs share a color.
    Paren(u8),
    Keyword,  // if, then, else, true, false
    Operator, // +, *, &&, ||, =>, ==, <
    Literal,  // integer and string constants
    Ident,    // base variables
    LeftRun,  // variables of the first run
    RightRun, // variables of the second run
}

impl Style {
    fn to_color_spec(self) -> ColorSpec {
        let mut s = ColorSpec::new();
        match self {
            Style::Paren(depth) => {
                let fg = match depth % 6 {
                    0 => Color::Blue,
                    1 => Color::Green,
                    2 => Color::White,
                    3 => Color::Yellow,
                    4 => Color::Red,
                    _ => Color::Magenta,
                };
                s.set_fg(Some(fg)).set_dimmed(true);
            }
            Style::Keyword => {
                s.set_fg(Some(Color::Cyan)).set_bold(true);
            }
            Style::Operator => {
                s.set_fg(Some(Color::Yellow)).set_bold(true);
            }
            Style::Literal => {
                s.set_fg(Some(Color::Magenta));
            }
            Style::Ident => {
                s.set_fg(Some(Color::Green)).set_bold(true);
            }
            Style::LeftRun => {
                s.set_fg(Some(Color::Blue)).set_bold(true);
            }
            Style::RightRun => {
                s.set_fg(Some(Color::Red)).set_bold(true);
            }
        }
        s
    }
}

fn styled(style: Style, s: &'static str) -> RcDoc<'static, Style> {
    RcDoc::as_string(s).annotate(style)
}

#[inline]
fn lparen(depth: u8) -> RcDoc<'static, Style> {
    RcDoc::as_string("(").annotate(Style::Paren(depth))
}

#[inline]
fn rparen(depth: u8) -> RcDoc<'static, Style> {
    RcDoc::as_string(")").annotate(Style::Paren(depth))
}

fn kw(s: &'static str) -> RcDoc<'static, Style> {
    styled(Style::Keyword, s)
}

fn op(s: &'static str) -> RcDoc<'static, Style> {
    styled(Style::Operator, s)
}

fn ident(v: &Variable) -> RcDoc<'static, Style> {
    let style = match v.side {
        Side::Base => Style::Ident,
        Side::Left => Style::LeftRun,
        Side::Right => Style::RightRun,
    };
    RcDoc::as_string(v.to_string()).annotate(style)
}

fn literal(v: &Value) -> RcDoc<'static, Style> {
    match v {
        Value::Bool(true) => kw("true"),
        Value::Bool(false) => kw("false"),
        other => RcDoc::as_string(other.to_string()).annotate(Style::Literal),
    }
}

/// Binding strength of the outer constructor; higher binds tighter.
fn precedence(term: &Term) -> u8 {
    use TermType::*;

    match term.term_type() {
        Ite => 1,
        Implies => 2,
        Or => 3,
        And => 4,
        // `!(a == b)` is printed as `a != b`.
        Not if is_disequality(term) => 6,
        Eq | Lt | Le => 6,
        Add | Sub => 7,
        Mul => 8,
        Not | Neg => 9,
        Const if matches!(term.as_const(), Some(Value::Int(i)) if *i < 0) => 9,
        Const | Var => 255,
    }
}

fn is_disequality(term: &Term) -> bool {
    matches!(term.node(), TermNode::Not(inner) if inner.term_type() == TermType::Eq)
}

/// Print `child` at `depth`, parenthesized unless it binds at least as tightly as `min`.
#[inline]
fn operand(child: &Term, min: u8, depth: u8) -> RcDoc<'static, Style> {
    if precedence(child) < min {
        lparen(depth)
            .append(to_doc_with_depth(child, depth + 1))
            .append(rparen(depth))
            .group()
    } else {
        to_doc_with_depth(child, depth)
    }
}

fn infix(
    lhs: &Term,
    symbol: &'static str,
    rhs: &Term,
    (lmin, rmin): (u8, u8),
    depth: u8,
) -> RcDoc<'static, Style> {
    operand(lhs, lmin, depth)
        .append(RcDoc::space())
        .append(op(symbol))
        .append(RcDoc::space())
        .append(operand(rhs, rmin, depth))
        .group()
}

fn chain(items: &[Term], symbol: &'static str, min: u8, depth: u8) -> RcDoc<'static, Style> {
    let separator = RcDoc::line().append(op(symbol)).append(RcDoc::space());
    RcDoc::intersperse(items.iter().map(|t| operand(t, min, depth)), separator).group()
}

/// Depth-aware conversion that colors parentheses by nesting level.
fn to_doc_with_depth(term: &Term, depth: u8) -> RcDoc<'static, Style> {
    use TermNode::*;

    match term.node() {
        Const(v) => literal(v),
        Var(v) => ident(v),
        Not(inner) => match inner.node() {
            Eq(a, b) => infix(a, "!=", b, (7, 7), depth),
            _ => op("!").append(operand(inner, 10, depth)).group(),
        },
        And(items) if items.is_empty() => kw("true"),
        And(items) => chain(items, "&&", 5, depth),
        Or(items) if items.is_empty() => kw("false"),
        Or(items) => chain(items, "||", 4, depth),
        // Right associative.
        Implies(a, b) => infix(a, "=>", b, (3, 2), depth),
        // Comparisons do not associate.
        Eq(a, b) => infix(a, "==", b, (7, 7), depth),
        Lt(a, b) => infix(a, "<", b, (7, 7), depth),
        Le(a, b) => infix(a, "<=", b, (7, 7), depth),
        // Left associative.
        Add(a, b) => infix(a, "+", b, (7, 8), depth),
        Sub(a, b) => infix(a, "-", b, (7, 8), depth),
        Mul(a, b) => infix(a, "*", b, (8, 9), depth),
        Neg(a) => op("-").append(operand(a, 10, depth)).group(),
        Ite(c, t, e) => kw("if")
            .append(RcDoc::space())
            .append(to_doc_with_depth(c, depth))
            .append(RcDoc::line())
            .append(kw("then"))
            .append(RcDoc::space())
            .append(to_doc_with_depth(t, depth))
            .append(RcDoc::line())
            .append(kw("else"))
            .append(RcDoc::space())
            .append(to_doc_with_depth(e, depth))
            .group()
            .nest(2),
    }
}

// A writer that maps Style annotations to termcolor ColorSpec on a WriteColor sink.
struct ColorWriter<'w, W: WriteColor + Write> {
    out: &'w mut W,
}

impl<'a, 'w, W: WriteColor + Write> RenderAnnotated<'a, Style> for ColorWriter<'w, W> {
    fn push_annotation(&mut self, ann: &'a Style) -> io::Result<()> {
        self.out.set_color(&ann.to_color_spec())
    }
    fn pop_annotation(&mut self) -> io::Result<()> {
        self.out.reset()
    }
}

impl<'w, W: WriteColor + Write> pretty::Render for ColorWriter<'w, W> {
    type Error = io::Error;
    fn write_str(&mut self, s: &str) -> io::Result<usize> {
        self.out.write_all(s.as_bytes())?;
        Ok(s.len())
    }
    fn write_str_all(&mut self, s: &str) -> io::Result<()> {
        self.out.write_all(s.as_bytes())
    }
    fn fail_doc(&self) -> Self::Error {
        io::Error::other("render failed")
    }
}

fn render_to<W: WriteColor + Write>(
    doc: &RcDoc<'_, Style>,
    width: usize,
    out: &mut W,
) -> io::Result<()> {
    let mut cw = ColorWriter { out };
    doc.render_raw(width, &mut cw)
}

const SINGLE_LINE_WIDTH: usize = 1 << 20;

/// Width of the terminal, or 80 if it cannot be determined.
fn terminal_width() -> usize {
    term_size::dimensions().map(|(w, _)| w).unwrap_or(80)
}

/// Pretty-printing conveniences for terms.
pub trait PrettyTerm {
    /// Build an RcDoc representation with style annotations.
    fn pretty_doc(&self) -> RcDoc<'static, Style>;

    /// Render with colors to any termcolor writer at the given width.
    fn pretty_render_to<W: WriteColor + Write>(&self, width: usize, out: &mut W) -> io::Result<()>;

    /// Print to stdout with colors (TTY-aware), at auto-detected width.
    fn pretty_print(&self) -> io::Result<()>;

    /// Format into a plain single-line string (no colors).
    fn pretty_string(&self) -> String;
}

impl PrettyTerm for Term {
    #[inline]
    fn pretty_doc(&self) -> RcDoc<'static, Style> {
        to_doc_with_depth(self, 0)
    }

    #[inline]
    fn pretty_render_to<W: WriteColor + Write>(&self, width: usize, out: &mut W) -> io::Result<()> {
        render_to(&self.pretty_doc(), width, out)
    }

    fn pretty_print(&self) -> io::Result<()> {
        let stdout = StandardStream::stdout(ColorChoice::Auto);
        let mut stdout = stdout.lock();
        self.pretty_render_to(terminal_width(), &mut stdout)
    }

    fn pretty_string(&self) -> String {
        let mut buf = String::new();
        let _ = self.pretty_doc().render_fmt(SINGLE_LINE_WIDTH, &mut buf);
        buf
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut w = FmtWrite::new(f);
        self.pretty_doc().render_raw(80, &mut w)
    }
}
