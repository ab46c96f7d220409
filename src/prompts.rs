//! Prompt selection for request payloads.

use crate::config::{PromptSelection, RunConfig};
use rand::prelude::*;

/// Picks the prompt for each dispatched request, either cycling through
/// the configured list or drawing from a weighted distribution.
pub struct PromptGenerator {
    prompts: Vec<String>,
    cumulative: Vec<f64>,
    selection: PromptSelection,
    rng: StdRng,
    next_index: usize,
}

impl PromptGenerator {
    pub fn new(config: &RunConfig) -> Self {
        let prompts: Vec<String> = config.prompts.iter().map(|p| p.text.clone()).collect();

        // Normalized cumulative distribution over prompt weights
        let mut weights: Vec<f64> = config.prompts.iter().map(|p| p.weight).collect();
        let total: f64 = weights.iter().sum();
        for w in &mut weights {
            *w /= total;
        }
        let mut cumulative = Vec::with_capacity(weights.len());
        let mut sum = 0.0;
        for w in &weights {
            sum += w;
            cumulative.push(sum);
        }

        // Seeded RNG for reproducible runs, entropy otherwise
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            prompts,
            cumulative,
            selection: config.prompt_selection,
            rng,
            next_index: 0,
        }
    }

    /// Next prompt according to the configured selection strategy.
    pub fn next_prompt(&mut self) -> String {
        let index = match self.selection {
            PromptSelection::Sequential => {
                let index = self.next_index % self.prompts.len();
                self.next_index += 1;
                index
            }
            PromptSelection::Weighted => {
                let roll: f64 = self.rng.gen();
                self.cumulative
                    .iter()
                    .position(|&c| roll <= c)
                    .unwrap_or(self.prompts.len() - 1)
            }
        };
        self.prompts[index].clone()
    }
}
