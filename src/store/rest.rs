// Upstash 風格的 REST 指令介面：
//   POST <base>           body = ["SETEX", key, ttl, value]  → {"result": ...}
//   POST <base>/pipeline  body = [[...], [...]]              → [{"result": ...}, {"error": ...}]

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::{ChunkStore, Op, Reply};
use crate::error::{StoreErr, StoreResult};

#[derive(Debug, Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    token: String,
}

impl RestStore {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, url: &str, body: &Value) -> StoreResult<Value> {
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreErr::Status { status: status.as_u16(), body });
        }
        Ok(resp.json().await?)
    }

    async fn run(&self, op: &Op) -> StoreResult<Reply> {
        let v = self.post(&self.base_url, &command(op)).await?;
        Ok(parse_reply(op, &v))
    }
}

fn command(op: &Op) -> Value {
    match op {
        Op::Put { key, value, ttl } => json!(["SETEX", key, ttl, value]),
        Op::Get { key } => json!(["GET", key]),
    }
}

fn parse_reply(op: &Op, v: &Value) -> Reply {
    if let Some(err) = v.get("error") {
        return Reply::Failed(err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string()));
    }
    match op {
        Op::Put { .. } => Reply::Done,
        Op::Get { .. } => match v.get("result") {
            None | Some(Value::Null) => Reply::Value(None),
            Some(Value::String(s)) if s == "null" => Reply::Value(None),
            Some(Value::String(s)) => Reply::Value(Some(s.clone())),
            Some(other) => Reply::Value(Some(other.to_string())),
        },
    }
}

#[async_trait]
impl ChunkStore for RestStore {
    async fn batch(&self, ops: Vec<Op>) -> StoreResult<Vec<Reply>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }
        let body = Value::Array(ops.iter().map(command).collect());
        let url = format!("{}/pipeline", self.base_url);
        let v = self.post(&url, &body).await?;

        let Value::Array(items) = v else {
            return Err(StoreErr::Command("pipeline reply is not an array".into()));
        };
        if items.len() != ops.len() {
            return Err(StoreErr::Command(format!(
                "pipeline sent {} commands, got {} replies",
                ops.len(),
                items.len()
            )));
        }
        debug!(n = ops.len(), "pipeline ok");
        Ok(ops.iter().zip(items.iter()).map(|(op, item)| parse_reply(op, item)).collect())
    }

    async fn put_raw(&self, key: &str, value: String, ttl: u64) -> StoreResult<()> {
        let op = Op::Put { key: key.to_string(), value, ttl };
        self.run(&op).await?.into_done()
    }

    async fn get_raw(&self, key: &str) -> StoreResult<Option<String>> {
        self.run(&Op::get(key)).await?.into_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setex_command_shape() {
        let op = Op::Put { key: "room:live:r1".into(), value: "{}".into(), ttl: 1500 };
        assert_eq!(command(&op), json!(["SETEX", "room:live:r1", 1500, "{}"]));
        assert_eq!(command(&Op::get("k")), json!(["GET", "k"]));
    }

    #[test]
    fn null_result_reads_as_absent() {
        let get = Op::get("k");
        assert_eq!(parse_reply(&get, &json!({"result": null})), Reply::Value(None));
        assert_eq!(parse_reply(&get, &json!({"result": "null"})), Reply::Value(None));
        assert_eq!(parse_reply(&get, &json!({"result": "abc"})), Reply::Value(Some("abc".into())));
    }

    #[test]
    fn empty_value_is_an_empty_payload() {
        let reply = parse_reply(&Op::get("k"), &json!({"result": ""}));
        assert_eq!(reply, Reply::Value(Some(String::new())));
        assert_eq!(reply.into_bytes().unwrap(), Some(Vec::new()));
    }

    #[test]
    fn per_command_error_is_kept_in_position() {
        let put = Op::Put { key: "k".into(), value: "v".into(), ttl: 1 };
        assert_eq!(
            parse_reply(&put, &json!({"error": "ERR max request size exceeded"})),
            Reply::Failed("ERR max request size exceeded".into())
        );
        assert_eq!(parse_reply(&put, &json!({"result": "OK"})), Reply::Done);
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        assert_eq!(RestStore::new("https://kv.example.io/", "t").base_url(), "https://kv.example.io");
    }
}
