//! Net description types: the JSON interchange format, no semantics attached.

use serde::{Deserialize, Serialize};

/// A business-process net as produced by an external frontend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetDescription {
    /// Net name (used to attribute failures).
    pub name: String,
    /// Place declarations with their initial token counts.
    pub places: Vec<PlaceDecl>,
    /// Transitions, in declaration order.
    pub transitions: Vec<TransitionDecl>,
    /// Data variables read by guards and written by effects.
    #[serde(default)]
    pub variables: Vec<VariableDecl>,
}

/// A place declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaceDecl {
    pub name: String,
    #[serde(default)]
    pub tokens: u32,
}

/// A data variable declaration. `None` means the variable starts unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableDecl {
    pub name: String,
    #[serde(default)]
    pub initial: Option<String>,
}

/// A transition declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionDecl {
    /// Transition name; doubles as its atomic proposition.
    pub name: String,
    /// Silent (tau) transitions carry no business meaning; formulas rarely
    /// mention them and they are usually projected away.
    #[serde(default)]
    pub silent: bool,
    #[serde(default)]
    pub inputs: Vec<ArcDecl>,
    #[serde(default)]
    pub outputs: Vec<ArcDecl>,
    /// Conjunction of `variable == value` conditions.
    #[serde(default)]
    pub guard: Vec<GuardDecl>,
    /// Variable assignments performed on firing.
    #[serde(default)]
    pub effects: Vec<EffectDecl>,
}

/// A weighted arc between a place and a transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArcDecl {
    pub place: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// A guard condition: `variable == equals`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuardDecl {
    pub variable: String,
    pub equals: String,
}

/// An assignment `variable := one of values`. More than one value makes the
/// firing nondeterministic: each value yields its own resulting configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EffectDecl {
    pub variable: String,
    pub values: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_filled_in() {
        let json = r#"{
            "name": "n",
            "places": [{"name": "p0", "tokens": 1}, {"name": "p1"}],
            "transitions": [
                {"name": "t0", "inputs": [{"place": "p0"}], "outputs": [{"place": "p1"}]}
            ]
        }"#;
        let net: NetDescription = serde_json::from_str(json).unwrap();
        assert_eq!(net.places[1].tokens, 0);
        assert_eq!(net.transitions[0].inputs[0].weight, 1);
        assert!(!net.transitions[0].silent);
        assert!(net.transitions[0].guard.is_empty());
        assert!(net.variables.is_empty());
    }
}
