//! Resolution passes.
//!
//! Turns a parsed program into one the MIDI backend can walk linearly:
//!
//! 1. repetitions `x*N` become N copies of `x`,
//! 2. `[...]` groups are spliced into their enclosing list,
//! 3. identifiers and macro calls are inlined.
//!
//! Every pass builds new lists from the old ones; nothing is spliced in place.

use tracing::{debug, trace};

use super::ast::{ChordMember, Expr, MacroDef, Program};
use super::error::CompileError;
use super::idents::{IdentEntry, IdentTable};
use super::token::Token;

/// Upper bound on expressions produced for one list or one movement.
pub const DEFAULT_MAX_EXPANSION: usize = 100_000;

/// Run all three passes. Stops after the first pass that reports errors.
pub fn resolve(program: &mut Program, max_expansion: usize) -> Result<(), Vec<CompileError>> {
    resolve_repetitions(program, max_expansion)?;
    flatten_groups(program);
    resolve_macros(program, max_expansion)
}

fn bodies_mut(program: &mut Program) -> impl Iterator<Item = &mut Vec<Expr>> {
    let macros = program.macros.iter_mut().map(|m| &mut m.body);
    let movements = program
        .tracks
        .iter_mut()
        .flat_map(|t| t.movements.iter_mut())
        .map(|m| &mut m.expressions);
    macros.chain(movements)
}

// --- Repetition ---

/// Expand `*N` in every macro and movement body.
pub fn resolve_repetitions(
    program: &mut Program,
    max_expansion: usize,
) -> Result<(), Vec<CompileError>> {
    let mut errors = Vec::new();
    for body in bodies_mut(program) {
        let list = std::mem::take(body);
        *body = expand_repetitions(list, max_expansion, &mut errors);
    }
    debug!(errors = errors.len(), "expanded repetitions");
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Replace each `Repetition(N)` and its preceding sibling with N clones of
/// that sibling. Recurses into groups and call arguments.
///
/// The limit applies to the flattened size of the result, so repeated
/// groups nested inside repeated groups cannot multiply past it.
pub fn expand_repetitions(
    list: Vec<Expr>,
    max_expansion: usize,
    errors: &mut Vec<CompileError>,
) -> Vec<Expr> {
    let mut out: Vec<Expr> = Vec::with_capacity(list.len());
    let mut size = 0usize;
    for expr in list {
        let (count, token) = match expr {
            Expr::Repetition { count, token } => (count, token),
            other => {
                let expanded = expand_within(other, max_expansion, errors);
                size = size.saturating_add(flat_size(&expanded));
                out.push(expanded);
                continue;
            }
        };

        let Some(prev) = out.pop() else {
            errors.push(
                CompileError::resolution("repetition has nothing to repeat", &token)
                    .with_tip("put the expression before the '*', e.g. `do*4`"),
            );
            continue;
        };

        let count = count as usize;
        let prev_size = flat_size(&prev);
        let rest = size - prev_size;
        if rest.saturating_add(prev_size.saturating_mul(count)) > max_expansion {
            errors.push(CompileError::resolution(
                format!("repeating {count} times exceeds the expansion limit of {max_expansion}"),
                &token,
            ));
            out.push(prev);
            continue;
        }
        size = rest + prev_size * count;
        out.extend(std::iter::repeat(prev).take(count));
    }
    out
}

/// Number of expressions `expr` occupies once its groups are spliced.
fn flat_size(expr: &Expr) -> usize {
    match expr {
        Expr::Group { items, .. } => items
            .iter()
            .fold(0usize, |acc, item| acc.saturating_add(flat_size(item))),
        _ => 1,
    }
}

fn expand_within(expr: Expr, max_expansion: usize, errors: &mut Vec<CompileError>) -> Expr {
    match expr {
        Expr::Group { items, token } => Expr::Group {
            items: expand_repetitions(items, max_expansion, errors),
            token,
        },
        Expr::MacroCall { name, args, token } => Expr::MacroCall {
            name,
            args: args
                .into_iter()
                .map(|arg| expand_within(arg, max_expansion, errors))
                .collect(),
            token,
        },
        Expr::Hold { inner, token } => Expr::Hold {
            inner: Box::new(expand_within(*inner, max_expansion, errors)),
            token,
        },
        other => other,
    }
}

// --- Groups ---

/// Splice every group in every macro and movement body.
pub fn flatten_groups(program: &mut Program) {
    for body in bodies_mut(program) {
        let list = std::mem::take(body);
        *body = flatten(list);
    }
    debug!("flattened groups");
}

/// Splice groups into `list`, recursively.
///
/// A group passed as a single call argument stays a group (so the argument
/// count is preserved) but its own contents are flattened.
pub fn flatten(list: Vec<Expr>) -> Vec<Expr> {
    let mut out = Vec::with_capacity(list.len());
    for expr in list {
        splice_into(&mut out, expr);
    }
    out
}

fn splice_into(out: &mut Vec<Expr>, expr: Expr) {
    match expr {
        Expr::Group { items, .. } => {
            for item in items {
                splice_into(out, item);
            }
        }
        other => out.push(flatten_arg(other)),
    }
}

fn flatten_arg(expr: Expr) -> Expr {
    match expr {
        Expr::Group { items, token } => Expr::Group {
            items: flatten(items),
            token,
        },
        Expr::MacroCall { name, args, token } => Expr::MacroCall {
            name,
            args: args.into_iter().map(flatten_arg).collect(),
            token,
        },
        Expr::Hold { inner, token } => Expr::Hold {
            inner: Box::new(flatten_arg(*inner)),
            token,
        },
        other => other,
    }
}

// --- Macros ---

/// Inline every identifier and macro call in every movement.
///
/// Macro bodies themselves are left as written. All problems found are
/// returned together.
pub fn resolve_macros(program: &mut Program, max_expansion: usize) -> Result<(), Vec<CompileError>> {
    let mut tracks = std::mem::take(&mut program.tracks);
    let mut resolver = Resolver::new(&program.macros, &program.idents, max_expansion);

    for track in &mut tracks {
        for movement in &mut track.movements {
            resolver.begin_movement(&movement.token);
            let body = std::mem::take(&mut movement.expressions);
            movement.expressions = resolver.resolve_list(body);
            debug!(
                track = %track.name,
                movement = %movement.key(),
                expressions = movement.expressions.len(),
                "resolved movement"
            );
        }
    }

    let errors = resolver.errors;
    program.tracks = tracks;
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

struct Resolver<'a> {
    macros: &'a [MacroDef],
    idents: &'a IdentTable,
    max_expansion: usize,
    /// Expressions emitted so far for the current movement, counting each
    /// chord member.
    produced: usize,
    exhausted: bool,
    movement: Option<Token>,
    /// Macros being inlined on the current path, outermost first.
    active: Vec<&'a str>,
    errors: Vec<CompileError>,
    /// Every failure seen, including ones deduplicated out of `errors`.
    failures: usize,
}

impl<'a> Resolver<'a> {
    fn new(macros: &'a [MacroDef], idents: &'a IdentTable, max_expansion: usize) -> Self {
        Self {
            macros,
            idents,
            max_expansion,
            produced: 0,
            exhausted: false,
            movement: None,
            active: Vec::new(),
            errors: Vec::new(),
            failures: 0,
        }
    }

    fn begin_movement(&mut self, token: &Token) {
        self.produced = 0;
        self.exhausted = false;
        self.movement = Some(token.clone());
        self.active.clear();
    }

    fn error(&mut self, err: CompileError) {
        self.failures += 1;
        // The same macro can fail the same way from several movements.
        if !self.errors.contains(&err) {
            self.errors.push(err);
        }
    }

    fn resolve_list(&mut self, list: Vec<Expr>) -> Vec<Expr> {
        let mut out = Vec::with_capacity(list.len());
        for expr in list {
            if self.exhausted {
                break;
            }
            self.resolve_into(expr, &mut out);
        }
        out
    }

    fn resolve_into(&mut self, expr: Expr, out: &mut Vec<Expr>) {
        match expr {
            Expr::Ident { name, token } => self.inline(&name, Vec::new(), &token, out),
            Expr::MacroCall { name, args, token } => self.inline(&name, args, &token, out),
            Expr::Group { items, .. } => {
                for item in items {
                    if self.exhausted {
                        break;
                    }
                    self.resolve_into(item, out);
                }
            }
            Expr::Chord { notes, token } => {
                let chord = self.resolve_chord(notes, token);
                self.emit(chord, out);
            }
            Expr::Hold { inner, token } => {
                if let Some(hold) = self.resolve_hold(*inner, token) {
                    self.emit(hold, out);
                }
            }
            Expr::Repetition { count, token } => self.error(CompileError::resolution(
                format!("repetition '*{count}' was not expanded before macro resolution"),
                &token,
            )),
            terminal => self.emit(terminal, out),
        }
    }

    fn emit(&mut self, expr: Expr, out: &mut Vec<Expr>) {
        if self.exhausted {
            return;
        }
        let cost = match &expr {
            Expr::Chord { notes, .. } => notes.len(),
            Expr::Hold { inner, .. } => match inner.as_ref() {
                Expr::Chord { notes, .. } => notes.len(),
                _ => 1,
            },
            _ => 1,
        };
        self.produced = self.produced.saturating_add(cost);
        if self.produced > self.max_expansion {
            self.exhausted = true;
            let at = self.movement.clone().unwrap_or_else(|| expr.token().clone());
            self.error(
                CompileError::resolution(
                    format!(
                        "movement expands to more than {} expressions",
                        self.max_expansion
                    ),
                    &at,
                )
                .with_tip("look for macros that call each other many times, or raise max_expansion in the config"),
            );
            return;
        }
        out.push(expr);
    }

    fn lookup(&mut self, name: &str, token: &Token) -> Option<&'a MacroDef> {
        let macros = self.macros;
        match self.idents.get(name) {
            Some(IdentEntry::Macro(index)) => {
                let def = index.checked_sub(1).and_then(|i| macros.get(i));
                if def.is_none() {
                    self.error(CompileError::internal(
                        format!("identifier table points '{name}' at missing macro #{index}"),
                        token,
                    ));
                }
                def
            }
            Some(IdentEntry::Movement { .. }) => {
                self.error(CompileError::resolution(
                    format!("'{name}' names a movement and cannot be used as a macro"),
                    token,
                ));
                None
            }
            None => {
                self.error(
                    CompileError::resolution(format!("unknown identifier '{name}'"), token)
                        .with_tip(format!("define it before use, e.g. `{name} = do re mi`")),
                );
                None
            }
        }
    }

    /// Inline macro `name` with `args` at the current position.
    fn inline(&mut self, name: &str, args: Vec<Expr>, token: &Token, out: &mut Vec<Expr>) {
        let Some(def) = self.lookup(name, token) else {
            return;
        };

        if self.active.contains(&def.name.as_str()) {
            let chain: Vec<&str> = self
                .active
                .iter()
                .copied()
                .skip_while(|active| *active != def.name)
                .chain(std::iter::once(def.name.as_str()))
                .collect();
            self.error(
                CompileError::resolution(
                    format!("macro '{}' references itself: {}", def.name, chain.join(" -> ")),
                    token,
                )
                .with_tip("macros cannot expand into themselves, directly or through other macros"),
            );
            return;
        }

        if args.len() != def.params.len() {
            self.error(CompileError::resolution(
                format!(
                    "arity mismatch: macro '{}' takes {} argument(s), {} given",
                    def.name,
                    def.params.len(),
                    args.len()
                ),
                token,
            ));
            return;
        }

        // Arguments are resolved where they are written, before they enter
        // the macro body, so parameter names cannot capture them.
        let args: Vec<Expr> = args.into_iter().map(|arg| self.resolve_arg(arg)).collect();
        if self.exhausted {
            return;
        }
        let body: Vec<Expr> = def
            .body
            .iter()
            .cloned()
            .map(|expr| self.substitute(expr, &def.params, &args))
            .collect();

        self.active.push(&def.name);
        trace!(
            name = %def.name,
            depth = self.active.len(),
            line = token.line,
            "inlining macro"
        );
        for expr in body {
            if self.exhausted {
                break;
            }
            self.resolve_into(expr, out);
        }
        self.active.pop();
    }

    /// Resolve one call argument; several resulting expressions are kept
    /// together in a group.
    fn resolve_arg(&mut self, arg: Expr) -> Expr {
        let token = arg.token().clone();
        let mut items = Vec::new();
        self.resolve_into(arg, &mut items);
        if items.len() == 1 {
            if let Some(single) = items.pop() {
                return single;
            }
        }
        Expr::Group { items, token }
    }

    /// Replace parameter references in `expr` with the matching argument.
    fn substitute(&mut self, expr: Expr, params: &[String], args: &[Expr]) -> Expr {
        match expr {
            Expr::Ident { name, token } => match params.iter().position(|p| *p == name) {
                Some(i) => args[i].clone(),
                None => Expr::Ident { name, token },
            },
            Expr::MacroCall {
                name,
                args: call_args,
                token,
            } => Expr::MacroCall {
                name,
                args: call_args
                    .into_iter()
                    .map(|arg| self.substitute(arg, params, args))
                    .collect(),
                token,
            },
            Expr::Group { items, token } => Expr::Group {
                items: items
                    .into_iter()
                    .map(|item| self.substitute(item, params, args))
                    .collect(),
                token,
            },
            Expr::Hold { inner, token } => Expr::Hold {
                inner: Box::new(self.substitute(*inner, params, args)),
                token,
            },
            Expr::Chord { notes, token } => {
                let mut members = Vec::with_capacity(notes.len());
                for member in notes {
                    self.substitute_member(member, params, args, &mut members);
                }
                Expr::Chord {
                    notes: members,
                    token,
                }
            }
            other => other,
        }
    }

    fn substitute_member(
        &mut self,
        member: ChordMember,
        params: &[String],
        args: &[Expr],
        members: &mut Vec<ChordMember>,
    ) {
        let (name, token) = match member {
            ChordMember::Ident { name, token } => (name, token),
            note => {
                members.push(note);
                return;
            }
        };
        let Some(i) = params.iter().position(|p| *p == name) else {
            members.push(ChordMember::Ident { name, token });
            return;
        };
        match &args[i] {
            Expr::Note(note) => members.push(ChordMember::Note(note.clone())),
            Expr::Chord { notes, .. } => members.extend(notes.iter().cloned()),
            _ => self.error(CompileError::resolution(
                format!("argument for '{name}' is used in a chord and must be a note or chord"),
                &token,
            )),
        }
    }

    fn resolve_chord(&mut self, members: Vec<ChordMember>, token: Token) -> Expr {
        let mut notes = Vec::with_capacity(members.len());
        for member in members {
            let (name, at) = match member {
                ChordMember::Note(note) => {
                    notes.push(ChordMember::Note(note));
                    continue;
                }
                ChordMember::Ident { name, token } => (name, token),
            };

            let mut resolved = Vec::new();
            self.resolve_into(
                Expr::Ident {
                    name: name.clone(),
                    token: at.clone(),
                },
                &mut resolved,
            );
            for expr in resolved {
                match expr {
                    Expr::Note(note) => notes.push(ChordMember::Note(note)),
                    Expr::Chord { notes: more, .. } => notes.extend(more),
                    _ => {
                        self.error(CompileError::resolution(
                            format!("'{name}' must expand to notes to be used in a chord"),
                            &at,
                        ));
                        break;
                    }
                }
            }
        }
        Expr::Chord { notes, token }
    }

    fn resolve_hold(&mut self, inner: Expr, token: Token) -> Option<Expr> {
        let before = self.failures;
        let mut resolved = Vec::new();
        self.resolve_into(inner, &mut resolved);
        if self.failures > before || self.exhausted {
            return None;
        }

        if resolved.len() == 1 && matches!(resolved[0], Expr::Note(_) | Expr::Chord { .. }) {
            let inner = resolved.swap_remove(0);
            return Some(Expr::Hold {
                inner: Box::new(inner),
                token,
            });
        }
        self.error(CompileError::resolution(
            "a held expression must expand to a single note or chord",
            &token,
        ));
        None
    }
}
