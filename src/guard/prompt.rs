use tracing::info;

use crate::model::{Evidence, GuardConfig, TemplateMode};

/// Fixed refusal string the strict template forces the generator to emit
/// verbatim when the evidence does not contain the answer. OutputGuard
/// accepts it unconditionally; never reword it.
pub const REFUSAL_STRING: &str =
    "❌ Não encontrei informações relevantes no contexto disponível.";

/// Fixed user-facing message for generator failures. The raw error goes to
/// the result's reason field and the logs, never to the user.
pub const GENERATION_ERROR_MESSAGE: &str =
    "❌ Não foi possível gerar uma resposta no momento. Tente novamente mais tarde.";

/// Fixed user-facing message when a generated answer fails output
/// validation. The raw answer is discarded, never shown.
pub const BLOCKED_OUTPUT_MESSAGE: &str =
    "❌ A resposta gerada não passou nas validações de qualidade e foi descartada.";

/// When the best accepted score sits this close to the threshold boundary,
/// confidence is marginal and the strict template is forced.
const STRICT_FORCE_MARGIN: f64 = 0.05;

pub struct PromptComposer<'a> {
    config: &'a GuardConfig,
}

impl<'a> PromptComposer<'a> {
    pub fn new(config: &'a GuardConfig) -> Self {
        Self { config }
    }

    pub fn compose(&self, question: &str, evidence: &[Evidence]) -> (String, TemplateMode) {
        let mode = self.effective_mode(evidence);
        let context = format_context(evidence);

        let prompt = match mode {
            TemplateMode::Strict => strict_prompt(question, &context),
            TemplateMode::Balanced => balanced_prompt(question, &context),
        };

        info!(
            template_mode = mode.as_str(),
            evidence_count = evidence.len(),
            prompt_chars = prompt.chars().count(),
            "prompt composed"
        );

        (prompt, mode)
    }

    fn effective_mode(&self, evidence: &[Evidence]) -> TemplateMode {
        if self.config.template_mode == TemplateMode::Strict {
            return TemplateMode::Strict;
        }

        let best = evidence
            .iter()
            .map(|e| e.score.value())
            .fold(f64::INFINITY, f64::min);
        let boundary = self.config.similarity_threshold.value() - STRICT_FORCE_MARGIN;
        if best > boundary {
            // Marginal evidence: tighten the template instead of trusting
            // the generator with latitude.
            return TemplateMode::Strict;
        }

        TemplateMode::Balanced
    }
}

fn format_context(evidence: &[Evidence]) -> String {
    let mut parts = Vec::<String>::with_capacity(evidence.len());
    for (index, item) in evidence.iter().enumerate() {
        parts.push(format!(
            "[{}] {}\n(Fonte: {})",
            index + 1,
            item.text.trim(),
            item.source_id
        ));
    }
    parts.join("\n\n")
}

fn strict_prompt(question: &str, context: &str) -> String {
    format!(
        "Você é um assistente que responde EXCLUSIVAMENTE com base no contexto fornecido.\n\
         \n\
         REGRAS OBRIGATÓRIAS:\n\
         1. Use APENAS informações presentes no CONTEXTO abaixo\n\
         2. Se a resposta não estiver no contexto, responda exatamente: \"{REFUSAL_STRING}\"\n\
         3. NUNCA invente, deduza ou use conhecimento externo\n\
         4. Sempre termine com a citação no formato (Fonte: nome_do_arquivo)\n\
         5. Responda em português brasileiro, de forma objetiva e direta\n\
         \n\
         PERGUNTA: {question}\n\
         \n\
         CONTEXTO:\n{context}\n\
         \n\
         RESPOSTA:"
    )
}

fn balanced_prompt(question: &str, context: &str) -> String {
    format!(
        "Você é um assistente especializado em responder com base em contexto fornecido.\n\
         \n\
         DIRETRIZES:\n\
         1. Priorize SEMPRE as informações do CONTEXTO fornecido\n\
         2. Use conhecimento geral apenas para esclarecimentos básicos\n\
         3. Indique claramente o que vem do contexto e o que é informação complementar\n\
         4. Se o contexto for insuficiente, responda exatamente: \"{REFUSAL_STRING}\"\n\
         5. Cite as fontes no formato (Fonte: nome_do_arquivo)\n\
         \n\
         PERGUNTA: {question}\n\
         \n\
         CONTEXTO:\n{context}\n\
         \n\
         RESPOSTA:"
    )
}
