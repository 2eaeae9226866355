use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::error::{LlmsimError, Result};
use crate::table::Table;
use crate::types::{Message, QueryConfig, Role};

/// Question columns and the generation column each one fills
const GENERATION_SLOTS: [(&str, &str); 2] =
    [("question_1", "generation_1"), ("question_2", "generation_2")];

/// Read the API key file; surrounding whitespace is dropped
pub fn read_api_key(path: impl AsRef<Path>) -> Result<String> {
    let key = std::fs::read_to_string(path)?;
    let key = key.trim();
    if key.is_empty() {
        return Err(LlmsimError::Config("API key file is empty".to_string()));
    }
    Ok(key.to_string())
}

/// Output file name encoding suffix, model, temperature, seed and example count
pub fn output_file_name(config: &QueryConfig) -> String {
    let suffix = config
        .suffix
        .map(|s| format!("_{}", s.as_str()))
        .unwrap_or_default();
    format!(
        "model_data{}_{}_temperature{}_seed{}_examples{}.csv",
        suffix,
        config.model.replace('/', "_"),
        config.temperature,
        config.seed,
        config.num_examples
    )
}

/// Hosted chat-completion runner
///
/// Issues one blocking request per prompt. There is no retry: the first
/// failing request ends the run.
pub struct QueryRunner {
    config: QueryConfig,
    client: Client<OpenAIConfig>,
    runtime: Runtime,
}

impl QueryRunner {
    /// Create with explicit API key (and the config's base URL, if any)
    pub fn with_api_key(config: QueryConfig, api_key: &str) -> Result<Self> {
        let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = &config.base_url {
            openai_config = openai_config.with_api_base(url);
        }
        let client = Client::with_config(openai_config);
        let runtime = Runtime::new()?;
        Ok(Self {
            config,
            client,
            runtime,
        })
    }

    /// Create with the key read from a key file
    pub fn from_key_file(config: QueryConfig, path: impl AsRef<Path>) -> Result<Self> {
        let key = read_api_key(path)?;
        Self::with_api_key(config, &key)
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Ask one question about one sentence
    ///
    /// Sends the instruction as system message, then sentence and question as
    /// two user messages. Returns the generated text (empty if none).
    pub fn complete(&self, instruction: &str, sentence: &str, question: &str) -> Result<String> {
        let history = [
            Message::system(instruction),
            Message::user(sentence),
            Message::user(question),
        ];
        self.call_llm(&history)
    }

    /// Call the LLM with the run's fixed generation parameters
    fn call_llm(&self, history: &[Message]) -> Result<String> {
        let messages = history
            .iter()
            .map(|m| -> Result<ChatCompletionRequestMessage> {
                Ok(match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let logit_bias: HashMap<String, serde_json::Value> = self
            .config
            .logit_bias
            .iter()
            .map(|(token, bias)| (token.to_string(), serde_json::Value::from(*bias)))
            .collect();

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.model)
            .messages(messages)
            .temperature(self.config.temperature)
            .max_tokens(self.config.max_tokens)
            .seed(self.config.seed)
            .logprobs(true)
            .logit_bias(logit_bias)
            .build()?;

        let response = self
            .runtime
            .block_on(async { self.client.chat().create(request).await })?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }

    /// Query every row of a prompt table
    ///
    /// Rows with an empty cell are dropped first. Each remaining row gets one
    /// generation per question slot, and the run metadata is written to the
    /// `model`, `temperature` and `seed` columns of every row.
    pub fn run(&self, prompts: &Table, instruction: &str) -> Result<Table> {
        let mut table = prompts.clone();
        let dropped = table.drop_incomplete();
        if dropped > 0 {
            info!("Dropped {} incomplete rows", dropped);
        }

        let sentence = table.column("sentence")?;
        let slots = GENERATION_SLOTS
            .iter()
            .map(|(question, generation)| table.column(question).map(|idx| (idx, *generation)))
            .collect::<Result<Vec<_>>>()?;
        let slots: Vec<(usize, usize)> = slots
            .into_iter()
            .map(|(question, generation)| (question, table.ensure_column(generation)))
            .collect();

        let start = Instant::now();
        let total = table.len();
        for row in 0..total {
            for &(question, generation) in &slots {
                let answer =
                    self.complete(instruction, table.cell(row, sentence), table.cell(row, question))?;
                debug!("row {}: {:?}", row, answer);
                table.set_cell(row, generation, answer);
            }
            info!("Row {}/{} done ({:?} elapsed)", row + 1, total, start.elapsed());
        }

        let metadata = self.config.metadata();
        table.fill_column("model", &metadata.model);
        table.fill_column("temperature", &metadata.temperature.to_string());
        table.fill_column("seed", &metadata.seed.to_string());

        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Suffix;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn completion_body(answer: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-3.5-turbo",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": answer},
                "finish_reason": "length",
                "logprobs": null
            }]
        })
    }

    /// Answers "1" to questions mentioning "rot", "7" otherwise
    struct AnswerByQuestion;

    impl Respond for AnswerByQuestion {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            let question = body["messages"][2]["content"].as_str().unwrap_or_default();
            let answer = if question.contains("rot") { "1" } else { "7" };
            ResponseTemplate::new(200).set_body_json(completion_body(answer))
        }
    }

    fn prompt_table() -> Table {
        let data = "\
cond,sentence,question_1,question_2,prompt_1,prompt_2
k,Der Apfel.,Wie rot?,Wie sicher?,p1,p2
p,Die Ampel.,Wie rot?,,p1,
n,Das Haus.,Wie gross?,Wie rot?,p1,p2
";
        Table::from_reader(csv::Reader::from_reader(data.as_bytes())).unwrap()
    }

    #[test]
    fn test_output_file_name() {
        let config = QueryConfig::new("gpt-4").with_seed(2).with_num_examples(10);
        assert_eq!(
            output_file_name(&config),
            "model_data_gpt-4_temperature0_seed2_examples10.csv"
        );

        let config = QueryConfig::new("org/model")
            .with_temperature(0.7)
            .with_suffix(Some(Suffix::NoStory));
        assert_eq!(
            output_file_name(&config),
            "model_data_no-story_org_model_temperature0.7_seed0_examples0.csv"
        );
    }

    #[test]
    fn test_read_api_key() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("key.txt");
        std::fs::write(&key_path, "sk-test\n").unwrap();
        assert_eq!(read_api_key(&key_path).unwrap(), "sk-test");

        std::fs::write(&key_path, "  \n").unwrap();
        assert!(matches!(read_api_key(&key_path), Err(LlmsimError::Config(_))));

        assert!(matches!(
            read_api_key(dir.path().join("missing.txt")),
            Err(LlmsimError::Io(_))
        ));
    }

    #[test]
    fn test_run_fills_generations_and_metadata() {
        let rt = Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("POST"))
                .and(path("/chat/completions"))
                .and(body_partial_json(json!({
                    "model": "gpt-3.5-turbo",
                    "max_tokens": 1,
                    "seed": 4,
                    "logprobs": true,
                    "logit_bias": {"198": -100}
                })))
                .respond_with(AnswerByQuestion)
                .expect(4)
                .mount(&server),
        );

        let config = QueryConfig::default().with_seed(4).with_base_url(server.uri());
        let runner = QueryRunner::with_api_key(config, "sk-test").unwrap();
        let out = runner.run(&prompt_table(), "Bitte antworten.").unwrap();

        // the row without a second question is dropped
        assert_eq!(out.len(), 2);
        assert_eq!(
            &out.headers()[6..],
            &["generation_1", "generation_2", "model", "temperature", "seed"]
        );
        assert_eq!(out.rows()[0][6..], ["1", "7", "gpt-3.5-turbo", "0", "4"]);
        assert_eq!(out.rows()[1][6..], ["7", "1", "gpt-3.5-turbo", "0", "4"]);
    }

    #[test]
    fn test_message_layout() {
        let rt = Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("POST"))
                .and(path("/chat/completions"))
                .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("3")))
                .mount(&server),
        );

        let config = QueryConfig::default().with_base_url(server.uri());
        let runner = QueryRunner::with_api_key(config, "sk-test").unwrap();
        let answer = runner.complete("Instr", "Satz", "Frage").unwrap();
        assert_eq!(answer, "3");

        let requests = rt.block_on(server.received_requests()).unwrap();
        assert_eq!(requests.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(
            body["messages"],
            json!([
                {"role": "system", "content": "Instr"},
                {"role": "user", "content": "Satz"},
                {"role": "user", "content": "Frage"}
            ])
        );
    }

    #[test]
    fn test_api_error_aborts_run() {
        let rt = Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("POST"))
                .and(path("/chat/completions"))
                .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                    "error": {
                        "message": "Incorrect API key provided",
                        "type": "invalid_request_error",
                        "param": null,
                        "code": "invalid_api_key"
                    }
                })))
                .expect(1)
                .mount(&server),
        );

        let config = QueryConfig::default().with_base_url(server.uri());
        let runner = QueryRunner::with_api_key(config, "sk-bad").unwrap();
        let result = runner.run(&prompt_table(), "Instr");
        assert!(matches!(result, Err(LlmsimError::OpenAi(_))));
    }

    #[test]
    fn test_missing_question_column() {
        let table =
            Table::from_reader(csv::Reader::from_reader("sentence\nSatz\n".as_bytes())).unwrap();
        let runner = QueryRunner::with_api_key(QueryConfig::default(), "sk-test").unwrap();
        assert!(matches!(
            runner.run(&table, "Instr"),
            Err(LlmsimError::MissingColumn(_))
        ));
    }
}
