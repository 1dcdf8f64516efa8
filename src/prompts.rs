//! Prompt templates for answer generation and the three judge dimensions.

/// Separator placed between retrieved chunks in a prompt context.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

const SCORE_INSTRUCTIONS: &str =
    "Output only a single number between 0.0 and 1.0. Example: 0.85\nScore:";

/// Joins retrieved chunk texts into one context block.
pub fn join_context(chunks: &[String]) -> String {
    chunks.join(CONTEXT_SEPARATOR)
}

/// Prompt sent to the generation model.
pub fn answer_prompt(question: &str, context: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are a precise assistant. Answer the question using only the context below. ");
    prompt.push_str("If the context does not contain the answer, say that you don't know instead of guessing.\n\n");
    prompt.push_str("Context:\n");
    prompt.push_str(context);
    prompt.push_str("\n\nQuestion: ");
    prompt.push_str(question);
    prompt.push_str("\nAnswer:");
    prompt
}

/// How well the answer is supported by the retrieved context.
pub fn faithfulness_prompt(question: &str, context: &str, answer: &str) -> String {
    format!(
        "You are evaluating an AI answer. Rate how well the answer is supported by the provided context.\n\n\
         Context: {context}\n\n\
         Question: {question}\n\n\
         Answer: {answer}\n\n\
         {SCORE_INSTRUCTIONS}"
    )
}

/// How well the answer addresses the question.
pub fn answer_relevance_prompt(question: &str, answer: &str) -> String {
    format!(
        "You are evaluating an AI answer. Rate how well the answer addresses the question asked.\n\n\
         Question: {question}\n\n\
         Answer: {answer}\n\n\
         {SCORE_INSTRUCTIONS}"
    )
}

/// How relevant the retrieved context is to the question.
pub fn context_relevance_prompt(question: &str, context: &str) -> String {
    format!(
        "You are evaluating retrieved context. Rate how relevant the retrieved context is to answering the question.\n\n\
         Question: {question}\n\n\
         Context: {context}\n\n\
         {SCORE_INSTRUCTIONS}"
    )
}
