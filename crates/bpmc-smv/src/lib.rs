//! SMV encoding of Kripke structures.
//!
//! The module has a single enumerated `state` variable, one `DEFINE` per
//! atomic proposition and an explicit `next(state)` case table. Proposition
//! names are turned into SMV identifiers and the same renaming is applied to
//! the formulas appended as `LTLSPEC` / `CTLSPEC`.

use bpmc_kripke::{StateId, Structure};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;
use tracing::debug;

/// Encoding error.
#[derive(Debug, Error)]
pub enum SmvError {
    #[error("structure has no initial state")]
    NoInitialState,
}

/// Temporal formulas to append, written over proposition names.
#[derive(Debug, Clone, Copy, Default)]
pub struct Formulas<'a> {
    pub ltl: &'a [String],
    pub ctl: &'a [String],
}

/// Words the SMV input language reserves.
const SMV_RESERVED: &[&str] = &[
    "MODULE", "VAR", "IVAR", "FROZENVAR", "DEFINE", "ASSIGN", "INIT", "TRANS", "INVAR", "SPEC",
    "LTLSPEC", "CTLSPEC", "INVARSPEC", "FAIRNESS", "JUSTICE", "COMPASSION", "init", "next",
    "case", "esac", "in", "mod", "union", "self", "process", "boolean", "word", "array", "of",
    "TRUE", "FALSE", "A", "E", "F", "G", "X", "U", "V", "Y", "Z", "H", "O", "S", "T", "AF",
    "AG", "AX", "AU", "EF", "EG", "EX", "EU", "state",
];

/// Render `structure` as a `main` module.
pub fn encode(structure: &Structure, formulas: Formulas<'_>) -> Result<String, SmvError> {
    if structure.initial_states().is_empty() {
        return Err(SmvError::NoInitialState);
    }

    let states = structure.states();
    let names: HashMap<StateId, String> = states
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id(), format!("s{i}")))
        .collect();
    let idents = identifiers(structure.propositions());

    let mut holders: BTreeMap<&str, Vec<&str>> = structure
        .propositions()
        .iter()
        .map(|p| (p.as_str(), Vec::new()))
        .collect();
    for state in &states {
        for label in state.labels() {
            if let Some(list) = holders.get_mut(label.as_str()) {
                list.push(&names[&state.id()]);
            }
        }
    }

    let mut out = SmvWriter::new();
    out.line("MODULE main");
    out.line("VAR");
    let all: Vec<&str> = states.iter().map(|s| names[&s.id()].as_str()).collect();
    out.line(&format!("  state : {{{}}};", all.join(", ")));

    if !holders.is_empty() {
        out.line("DEFINE");
        for (prop, list) in &holders {
            let body = if list.is_empty() {
                "FALSE".to_string()
            } else {
                format!("state in {{{}}}", list.join(", "))
            };
            out.line(&format!("  {} := {};", idents[*prop], body));
        }
    }

    out.line("ASSIGN");
    let mut initial: Vec<&str> = structure
        .initial_states()
        .iter()
        .map(|id| names[id].as_str())
        .collect();
    initial.sort_by_key(|n| state_number(n));
    out.line(&format!("  init(state) := {{{}}};", initial.join(", ")));
    out.line("  next(state) :=");
    out.line("    case");
    for state in &states {
        let mut succs: Vec<&str> = state
            .successors()
            .iter()
            .map(|id| names[id].as_str())
            .collect();
        succs.sort_by_key(|n| state_number(n));
        // A deadlocked state stutters so that every path stays infinite.
        if succs.is_empty() {
            succs.push(&names[&state.id()]);
        }
        out.line(&format!(
            "      state = {} : {{{}}};",
            names[&state.id()],
            succs.join(", ")
        ));
    }
    out.line("    esac;");

    for formula in formulas.ltl {
        out.line(&format!("LTLSPEC {}", rename(formula, &idents)));
    }
    for formula in formulas.ctl {
        out.line(&format!("CTLSPEC {}", rename(formula, &idents)));
    }

    debug!(
        states = states.len(),
        propositions = idents.len(),
        "encoded SMV module"
    );
    Ok(out.finish())
}

fn state_number(name: &str) -> usize {
    name[1..].parse().unwrap_or(usize::MAX)
}

/// Map every proposition to a distinct SMV identifier.
pub fn identifiers(propositions: &BTreeSet<String>) -> BTreeMap<String, String> {
    let mut taken: BTreeSet<String> = BTreeSet::new();
    let mut map = BTreeMap::new();
    for prop in propositions {
        let base = sanitize(prop);
        let mut ident = base.clone();
        let mut n = 1;
        while !taken.insert(ident.clone()) {
            ident = format!("{base}_{n}");
            n += 1;
        }
        map.insert(prop.clone(), ident);
    }
    map
}

fn sanitize(prop: &str) -> String {
    let mut ident: String = prop
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let starts_ok = ident
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_ok || SMV_RESERVED.contains(&ident.as_str()) || is_state_constant(&ident) {
        ident.insert_str(0, "p_");
    }
    ident
}

/// `s<digits>` names the values of the `state` variable.
fn is_state_constant(ident: &str) -> bool {
    ident
        .strip_prefix('s')
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace whole-word proposition names in `formula`, longest names first so
/// that `x=1` wins over `x`.
fn rename(formula: &str, idents: &BTreeMap<String, String>) -> String {
    let mut props: Vec<(&String, &String)> = idents.iter().collect();
    props.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));

    let mut out = String::with_capacity(formula.len());
    let mut rest = formula;
    'scan: while let Some(c) = rest.chars().next() {
        let at_boundary = out.chars().last().map_or(true, |p| !is_ident_char(p));
        if at_boundary {
            for (prop, ident) in &props {
                if let Some(after) = rest.strip_prefix(prop.as_str()) {
                    if after.chars().next().map_or(true, |n| !is_ident_char(n)) {
                        out.push_str(ident);
                        rest = after;
                        continue 'scan;
                    }
                }
            }
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

struct SmvWriter {
    output: String,
}

impl SmvWriter {
    fn new() -> Self {
        Self {
            output: String::new(),
        }
    }

    fn line(&mut self, s: &str) {
        self.output.push_str(s);
        self.output.push('\n');
    }

    fn finish(self) -> String {
        self.output
    }
}
