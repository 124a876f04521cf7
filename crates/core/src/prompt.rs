use crate::models::Chunk;

pub const NO_DISCREPANCIES: &str = "No discrepancies detected.";

const CONTEXT_SEPARATOR: &str = "\n\n";

pub fn join_context(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|chunk| chunk.text.trim())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// The single fixed instruction sent to the generation model.
pub fn build_audit_prompt(reference_excerpt: &str, context: &str) -> String {
    format!(
        r#"You are a forensic auditor. Your task is to find EVERY discrepancy between the Context (suspect)
and the Reference Truth (master).

Reference Truth: {reference_excerpt}

Context (Suspect Data): {context}

INSTRUCTIONS:
- Compare dollar amounts ($) and hourly rates precisely.
- Check all dates (months and days) for changes.
- Verify quantities (e.g., number of staff, number of dashboards).
- Look for changes in "Ownership" or "Timeline" clauses.

Answer ONLY with a bulleted list of specific differences.
Format: [Category]: [Reference Value] vs [Suspect Value].
If none are found, say '{sentinel}'"#,
        sentinel = NO_DISCREPANCIES,
    )
}
