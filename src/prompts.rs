use std::path::Path;

use tracing::{debug, info};

use crate::error::Result;
use crate::table::Table;
use crate::types::PromptConfig;

/// Question slots and the prompt column each one produces
pub const QUESTION_SLOTS: [(&str, &str); 2] = [("question_1", "prompt_1"), ("question_2", "prompt_2")];

/// Read the instruction template; its entire contents start every prompt
pub fn read_instruction(path: impl AsRef<Path>) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}

/// Rewrite inline markup into explicit annotations
///
/// `<b>`/`</b>` become the configured bracket phrases and `<br>` is removed
/// without leaving a space behind. Applying it twice gives the same result.
pub fn rewrite_markup(sentence: &str, config: &PromptConfig) -> String {
    sentence
        .replace("<b>", &config.open_marker)
        .replace("</b>", &config.close_marker)
        .replace("<br>", "")
}

/// Join instruction, sentence and question with newlines
pub fn assemble_prompt(instruction: &str, sentence: &str, question: &str) -> String {
    format!("{instruction}\n{sentence}\n{question}")
}

/// Build the prompt table from a stimuli table
///
/// Keeps rows whose `cond` is accepted, drops the flag columns, rewrites the
/// `sentence` column in place and adds one prompt column per question slot.
/// A slot with an empty question gets an empty prompt.
pub fn build_prompts(stimuli: &Table, instruction: &str, config: &PromptConfig) -> Result<Table> {
    let mut table = stimuli.clone();

    let cond = table.column("cond")?;
    let total = table.len();
    table.retain_rows(cond, |code| config.conditions.iter().any(|c| c == code));
    info!("Kept {} of {} stimuli for conditions {:?}", table.len(), total, config.conditions);

    table.drop_columns(&config.drop_columns);

    let sentence = table.column("sentence")?;
    let questions = QUESTION_SLOTS
        .iter()
        .map(|(question, _)| table.column(question))
        .collect::<Result<Vec<_>>>()?;

    for row in 0..table.len() {
        let rewritten = rewrite_markup(table.cell(row, sentence), config);
        table.set_cell(row, sentence, rewritten);
    }

    for ((_, prompt_column), question) in QUESTION_SLOTS.iter().zip(questions) {
        let target = table.ensure_column(prompt_column);
        for row in 0..table.len() {
            let q = table.cell(row, question);
            let prompt = if q.trim().is_empty() {
                String::new()
            } else {
                assemble_prompt(instruction, table.cell(row, sentence), q)
            };
            debug!("row {} {}: {} chars", row, prompt_column, prompt.len());
            table.set_cell(row, target, prompt);
        }
    }

    Ok(table)
}
