//! Terminal operator – answers the control loop's questions from stdin.
//!
//! Prompts, in the order the loop asks them:
//!
//!   Press [Enter] to start.      – only one policy is loaded
//!   select policy:               – several policies, pick an index
//!   New instruction? [y/n]       – every episode after the first
//!   Instruction?                 – free-form task text
//!
//! End of input, `q`, or a raised shutdown flag end the session.

use colored::Colorize;
use std::io::{self, BufRead, Stdout, StdinLock, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use armloop_runtime::Operator;
use armloop_types::Goal;

/// Width of the language embedding handed to policies.  Instruction
/// encoding is external, so goals carry a zero vector of this size.
pub const LANGUAGE_EMBEDDING_DIM: usize = 512;

/// [`Operator`] driven by line-oriented text input.
pub struct PromptOperator<R, W> {
    input: R,
    output: W,
    shutdown: Arc<AtomicBool>,
}

impl PromptOperator<StdinLock<'static>, Stdout> {
    /// Operator reading from stdin and prompting on stdout.
    pub fn stdio(shutdown: Arc<AtomicBool>) -> Self {
        Self::new(io::stdin().lock(), io::stdout(), shutdown)
    }
}

impl<R: BufRead, W: Write> PromptOperator<R, W> {
    pub fn new(input: R, output: W, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            input,
            output,
            shutdown,
        }
    }

    /// Print `prompt` and read one trimmed line.  `None` on end of input,
    /// read errors, or shutdown.
    fn ask(&mut self, prompt: &str) -> Option<String> {
        write!(self.output, "{} ", prompt.bold()).ok();
        self.output.flush().ok();

        let mut line = String::new();
        let read = self.input.read_line(&mut line);
        if self.shutdown.load(Ordering::SeqCst) {
            return None;
        }
        match read {
            Ok(0) => None,
            Ok(_) => Some(line.trim().to_string()),
            Err(e) => {
                writeln!(self.output, "{}: {}", "Read error".red(), e).ok();
                None
            }
        }
    }
}

impl<R: BufRead, W: Write> Operator for PromptOperator<R, W> {
    fn select_policy(&mut self, names: &[String]) -> Option<usize> {
        if self.shutdown.load(Ordering::SeqCst) {
            return None;
        }
        if names.len() == 1 {
            writeln!(self.output, "\n  Policy: {}", names[0].cyan()).ok();
            return self.ask("Press [Enter] to start.").map(|_| 0);
        }

        writeln!(self.output).ok();
        for (i, name) in names.iter().enumerate() {
            writeln!(self.output, "  {}) {}", i, name.cyan()).ok();
        }
        loop {
            let answer = self.ask("select policy:")?;
            if answer.eq_ignore_ascii_case("q") {
                return None;
            }
            match answer.parse::<usize>() {
                Ok(i) if i < names.len() => return Some(i),
                _ => {
                    writeln!(
                        self.output,
                        "  {} enter a number between 0 and {}, or q to quit",
                        "Invalid choice:".red(),
                        names.len() - 1
                    )
                    .ok();
                }
            }
        }
    }

    fn new_goal(&mut self, current: Option<&Goal>) -> Option<Goal> {
        if let Some(goal) = current {
            writeln!(self.output, "  Current instruction: {}", goal.instruction.yellow()).ok();
            let answer = self.ask("New instruction? [y/n]")?;
            if !answer.to_ascii_lowercase().starts_with('y') {
                return None;
            }
        }
        let instruction = self.ask("Instruction?")?;
        if instruction.is_empty() {
            return None;
        }
        Some(Goal {
            instruction,
            language: vec![0.0; LANGUAGE_EMBEDDING_DIM],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn operator(input: &str) -> PromptOperator<Cursor<Vec<u8>>, Vec<u8>> {
        PromptOperator::new(
            Cursor::new(input.as_bytes().to_vec()),
            Vec::new(),
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("bc-{i}")).collect()
    }

    fn output(op: &PromptOperator<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8_lossy(&op.output).into_owned()
    }

    #[test]
    fn single_policy_needs_only_enter() {
        let mut op = operator("\n");
        assert_eq!(op.select_policy(&names(1)), Some(0));
        assert!(output(&op).contains("Press [Enter] to start."));
    }

    #[test]
    fn several_policies_reprompt_until_valid() {
        let mut op = operator("7\nabc\n1\n");
        assert_eq!(op.select_policy(&names(2)), Some(1));
        let out = output(&op);
        assert!(out.contains("bc-0"));
        assert!(out.matches("Invalid choice").count() == 2);
    }

    #[test]
    fn q_and_eof_quit() {
        assert_eq!(operator("q\n").select_policy(&names(3)), None);
        assert_eq!(operator("").select_policy(&names(3)), None);
        assert_eq!(operator("").select_policy(&names(1)), None);
    }

    #[test]
    fn first_goal_is_asked_directly() {
        let mut op = operator("stack the blocks\n");
        let goal = op.new_goal(None).expect("goal");
        assert_eq!(goal.instruction, "stack the blocks");
        assert_eq!(goal.language.len(), LANGUAGE_EMBEDDING_DIM);
        assert!(!output(&op).contains("New instruction?"));
    }

    #[test]
    fn later_goals_can_be_kept_or_replaced() {
        let current = Goal {
            instruction: "open the drawer".to_string(),
            language: Vec::new(),
        };
        let mut op = operator("n\n");
        assert_eq!(op.new_goal(Some(&current)), None);

        let mut op = operator("y\nclose the drawer\n");
        let goal = op.new_goal(Some(&current)).expect("new goal");
        assert_eq!(goal.instruction, "close the drawer");
        assert!(output(&op).contains("New instruction? [y/n]"));
    }

    #[test]
    fn raised_shutdown_flag_ends_the_session() {
        let mut op = operator("\n\n");
        op.shutdown.store(true, Ordering::SeqCst);
        assert_eq!(op.select_policy(&names(1)), None);
        assert_eq!(op.new_goal(None), None);
    }
}
