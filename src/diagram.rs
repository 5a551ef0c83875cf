use std::{collections::BTreeSet, fs::File, io::Write, path::Path};

use crate::{
    observers::StateChange, registry::TransitionRegistry, state::LoanState, transition::Transition,
};

/// Rendering tools for the transition table
#[derive(Debug)]
pub struct Diagram;

impl Diagram {
    /// Generate a textual listing of every state and its outgoing edges
    #[must_use]
    pub fn describe_registry(registry: &TransitionRegistry) -> String {
        let mut text = String::from("=== Loan State Machine ===\n");

        for state in registry.states() {
            text.push_str(&format!("\n{state}: {}\n", state.get_description()));

            let transitions = registry.transitions_from(state).unwrap_or_default();
            if transitions.is_empty() {
                text.push_str("  (No outgoing transitions)\n");
            }
            for transition in transitions {
                text.push_str(&format!(
                    "  --({})--> {}\n",
                    Self::edge_label(transition),
                    transition.destination
                ));
            }
        }

        text
    }

    /// Generate a DOT graph of the registry
    ///
    /// Edges taken in `highlight` are drawn in red; the state the last change
    /// ended in gets a double border.
    #[must_use]
    pub fn generate_dot(registry: &TransitionRegistry, highlight: &[StateChange]) -> String {
        let mut dot = String::from("digraph loan_circulation {\n");
        dot.push_str("  rankdir=LR;\n");
        dot.push_str("  node [shape=box, style=\"rounded,filled\", fillcolor=lightblue];\n");

        let current = highlight.last().map(|change| change.updated.state);
        for state in registry.states() {
            let terminal = registry.transitions_from(state).is_ok_and(<[Transition]>::is_empty);
            let mut attributes = format!("label=\"{state}\"");
            if terminal {
                attributes.push_str(", fillcolor=lightgrey, peripheries=2");
            }
            if current == Some(state) {
                attributes.push_str(", fillcolor=palegreen, penwidth=2.0");
            }
            dot.push_str(&format!("  {} [{attributes}];\n", Self::node_id(state)));
        }

        let taken: BTreeSet<(LoanState, LoanState)> =
            highlight.iter().map(|change| (change.previous.state, change.updated.state)).collect();

        for transition in registry.iter() {
            let style = if taken.contains(&(transition.source, transition.destination)) {
                "color=red, penwidth=2.0"
            } else if transition.is_triggered() {
                "color=black"
            } else {
                "color=black, style=dashed"
            };

            let label = Self::edge_label(transition).replace('"', "\\\"");
            dot.push_str(&format!(
                "  {} -> {} [label=\"{label}\", {style}];\n",
                Self::node_id(transition.source),
                Self::node_id(transition.destination)
            ));
        }

        dot.push_str("}\n");
        dot
    }

    /// Save the DOT representation to a file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written to
    pub fn save_dot_to_file(dot: &str, path: impl AsRef<Path>) -> Result<(), std::io::Error> {
        let mut file = File::create(path)?;
        file.write_all(dot.as_bytes())?;
        Ok(())
    }

    /// Generate a markdown table of observed changes
    #[must_use]
    pub fn history_table(changes: &[StateChange]) -> String {
        if changes.is_empty() {
            return "No transitions recorded yet.".to_string();
        }

        let mut table = String::from("| # | Loan | From | To | Due |\n");
        table.push_str("|---|------|------|----|-----|\n");

        for (number, change) in (1_usize..).zip(changes) {
            let due =
                change.updated.end_date.map_or_else(|| "-".to_string(), |date| date.to_string());
            table.push_str(&format!(
                "| {number} | {} | {} | {} | {due} |\n",
                change.updated.loan_pid, change.previous.state, change.updated.state
            ));
        }

        table
    }

    /// Label of an edge: the trigger or `auto`, then the guard chain
    fn edge_label(transition: &Transition) -> String {
        let mut label = transition.trigger.clone().unwrap_or_else(|| "auto".to_string());
        if !transition.guards.is_empty() {
            let guards: Vec<String> = transition.guards.iter().map(ToString::to_string).collect();
            label.push_str(&format!(" [{}]", guards.join(", ")));
        }
        label
    }

    /// DOT identifier of a state
    fn node_id(state: LoanState) -> String {
        state.as_str().to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::Diagram;
    use crate::{
        config::CirculationConfig,
        loan::Loan,
        observers::StateChange,
        registry::TransitionRegistry,
        state::LoanState,
    };

    fn default_registry() -> TransitionRegistry {
        TransitionRegistry::from_config(&CirculationConfig::default()).unwrap_or_default()
    }

    fn change(from: LoanState, to: LoanState) -> StateChange {
        let previous = Loan::new("loan-1", from);
        let updated = Loan { state: to, ..previous.clone() };
        StateChange { previous, updated }
    }

    #[test]
    fn test_dot_lists_every_edge() {
        let registry = default_registry();
        let dot = Diagram::generate_dot(&registry, &[]);

        assert!(dot.starts_with("digraph loan_circulation {"));
        assert_eq!(dot.matches(" -> ").count(), registry.iter().count());
        assert!(dot.contains(
            "item_on_loan -> item_in_transit_to_house [label=\"auto [should_item_be_returned]\""
        ));
        assert!(
            dot.contains("item_on_loan -> item_returned [label=\"auto [!should_item_be_returned]\"")
        );
        assert!(
            dot.contains("cancelled [label=\"CANCELLED\", fillcolor=lightgrey, peripheries=2]")
        );
    }

    #[test]
    fn test_dot_highlights_taken_edges() {
        let registry = default_registry();
        let history = [
            change(LoanState::Created, LoanState::Pending),
            change(LoanState::Pending, LoanState::ItemAtDesk),
        ];

        let dot = Diagram::generate_dot(&registry, &history);

        assert_eq!(dot.matches("color=red").count(), 2);
        assert!(dot.contains("item_at_desk [label=\"ITEM_AT_DESK\", fillcolor=palegreen"));
    }

    #[test]
    fn test_history_table() {
        assert_eq!(Diagram::history_table(&[]), "No transitions recorded yet.");

        let table = Diagram::history_table(&[change(LoanState::Created, LoanState::ItemOnLoan)]);
        assert!(table.contains("| 1 | loan-1 | CREATED | ITEM_ON_LOAN | - |"));
    }

    #[test]
    fn test_describe_marks_dead_ends() {
        let text = Diagram::describe_registry(&default_registry());

        assert!(text.contains("--(checkout [loan_duration_valid])--> ITEM_ON_LOAN"));
        assert_eq!(text.matches("(No outgoing transitions)").count(), 2);
    }

    #[test]
    fn test_save_dot_to_file() {
        let dir = tempfile::tempdir();
        assert!(dir.is_ok());
        let Ok(dir) = dir else { return };
        let path = dir.path().join("loans.dot");

        assert!(Diagram::save_dot_to_file("digraph {}\n", &path).is_ok());
        assert_eq!(std::fs::read_to_string(&path).ok().as_deref(), Some("digraph {}\n"));
    }
}
