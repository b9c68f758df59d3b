use super::{Attacker, AttackerContext};
use crate::error::RmeterError;
use crate::model::DoResult;
use async_trait::async_trait;
use std::time::Duration;

/// Reference attacker: GETs `targetUrl` and reports status code and body
/// size. Good enough to exercise the engine end to end and to build other
/// attackers against.
pub struct HttpAttacker {
    client: Option<reqwest::Client>,
    target_url: String,
    dump_transport: bool,
}

impl HttpAttacker {
    pub fn new() -> Self {
        HttpAttacker {
            client: None,
            target_url: String::new(),
            dump_transport: false,
        }
    }
}

impl Default for HttpAttacker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Attacker for HttpAttacker {
    async fn setup(&mut self, ctx: &AttackerContext) -> Result<(), RmeterError> {
        self.target_url = ctx.config.target_url.clone();
        self.dump_transport = ctx.config.dump_transport;
        let timeout = Duration::from_secs(ctx.config.attacker_timeout_secs.max(1));
        self.client = Some(
            reqwest::Client::builder()
                .timeout(timeout)
                .pool_max_idle_per_host(64)
                .build()
                .map_err(|e| RmeterError::AttackerSetup(e.to_string()))?,
        );
        Ok(())
    }

    async fn do_call(&mut self) -> DoResult {
        let client = match &self.client {
            Some(c) => c,
            None => return DoResult::failed("GET", "attacker not set up"),
        };

        match client.get(&self.target_url).send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                match resp.bytes().await {
                    Ok(body) => {
                        if self.dump_transport {
                            tracing::debug!(status, bytes = body.len(), "response received");
                        }
                        DoResult::ok("GET", status, body.len() as u64, 0)
                    }
                    Err(e) => DoResult::failed("GET", e.to_string()),
                }
            }
            Err(e) => DoResult::failed("GET", e.to_string()),
        }
    }

    async fn teardown(&mut self) -> Result<(), RmeterError> {
        Ok(())
    }

    fn clone_attacker(&self) -> Box<dyn Attacker> {
        Box::new(HttpAttacker {
            client: self.client.clone(),
            target_url: self.target_url.clone(),
            dump_transport: self.dump_transport,
        })
    }
}
