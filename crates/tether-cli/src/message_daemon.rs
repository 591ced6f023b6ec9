//! Built-in daemon served by `tether serve`

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use tether_core::daemon::{decode, Args};
use tether_core::{Daemon, Lifecycle, Member, MemberResult, RemoteError, RemoteObject};

/// Messages kept in `pst_history`
const HISTORY_LIMIT: usize = 100;

#[derive(Default)]
struct MessageState {
    messages: Vec<String>,
    pst_counter: u64,
    pst_history: Vec<String>,
}

/// Queues messages sent with `insert_message` and prints them from its main loop
pub struct MessageDaemon {
    name: String,
    poll_interval: Duration,
    state: Mutex<MessageState>,
}

impl MessageDaemon {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_poll_interval(name, Duration::from_secs(5))
    }

    pub fn with_poll_interval(name: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            name: name.into(),
            poll_interval,
            state: Mutex::new(MessageState::default()),
        }
    }

    fn state(&self) -> MemberResult<MutexGuard<'_, MessageState>> {
        self.state
            .lock()
            .map_err(|_| RemoteError::runtime("message state lock poisoned"))
    }

    fn insert_message(&self, msg: String) -> MemberResult<()> {
        let mut state = self.state()?;
        state.pst_counter += 1;
        state.pst_history.push(msg.clone());
        if state.pst_history.len() > HISTORY_LIMIT {
            let excess = state.pst_history.len() - HISTORY_LIMIT;
            state.pst_history.drain(..excess);
        }
        state.messages.push(msg);
        Ok(())
    }

    /// Take every queued message
    fn drain(&self) -> MemberResult<Vec<String>> {
        Ok(std::mem::take(&mut self.state()?.messages))
    }
}

#[async_trait]
impl RemoteObject for MessageDaemon {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn get(&self, name: &str) -> MemberResult<Member> {
        let state = self.state()?;
        match name {
            "messages" => Member::value(&state.messages),
            "pst_counter" => Member::value(state.pst_counter),
            "pst_history" => Member::value(&state.pst_history),
            "insert_message" => Ok(Member::Method),
            _ => Err(RemoteError::attribute_not_found(self.type_name(), name)),
        }
    }

    fn set(&self, name: &str, value: Value) -> MemberResult<()> {
        let mut state = self.state()?;
        match name {
            "messages" => state.messages = decode(name, value)?,
            "pst_counter" => state.pst_counter = decode(name, value)?,
            "pst_history" => state.pst_history = decode(name, value)?,
            "insert_message" => return Err(RemoteError::read_only(name)),
            _ => return Err(RemoteError::attribute_not_found(self.type_name(), name)),
        }
        Ok(())
    }

    async fn invoke(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> MemberResult<Value> {
        let args = Args::new(name, args, kwargs);
        match name {
            "insert_message" => {
                args.at_most(1)?;
                self.insert_message(args.required(0, "msg")?)?;
                Ok(Value::from("Message received!"))
            }
            "messages" | "pst_counter" | "pst_history" => Err(RemoteError::not_callable(name)),
            _ => Err(RemoteError::attribute_not_found(self.type_name(), name)),
        }
    }
}

#[async_trait]
impl Daemon for MessageDaemon {
    fn persisted_fields(&self) -> Vec<String> {
        vec!["pst_counter".to_string(), "pst_history".to_string()]
    }

    async fn run(&self, lifecycle: Lifecycle) -> tether_core::Result<()> {
        while lifecycle.is_running() {
            let messages = self.drain()?;
            if !messages.is_empty() {
                info!("Found {} new messages", messages.len());
                for msg in messages {
                    println!("{}", msg);
                }
            }
            lifecycle.sleep(self.poll_interval).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_core::{AppConfig, DaemonHost, ErrorKind, Proxy};

    #[tokio::test]
    async fn test_insert_message() {
        let daemon = MessageDaemon::new("MessageDaemon");
        let reply = daemon
            .invoke("insert_message", vec![json!("hi")], Map::new())
            .await
            .unwrap();
        assert_eq!(reply, json!("Message received!"));

        assert_eq!(daemon.get("pst_counter").unwrap(), Member::Value(json!(1)));
        assert_eq!(daemon.get("pst_history").unwrap(), Member::Value(json!(["hi"])));
        assert_eq!(daemon.drain().unwrap(), vec!["hi".to_string()]);
        assert!(daemon.drain().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let daemon = MessageDaemon::new("MessageDaemon");
        for i in 0..HISTORY_LIMIT + 5 {
            daemon.insert_message(format!("msg {}", i)).unwrap();
        }

        let state = daemon.state().unwrap();
        assert_eq!(state.pst_history.len(), HISTORY_LIMIT);
        assert_eq!(state.pst_history[0], "msg 5");
        assert_eq!(state.pst_counter, (HISTORY_LIMIT + 5) as u64);
    }

    #[tokio::test]
    async fn test_bad_arguments() {
        let daemon = MessageDaemon::new("MessageDaemon");
        let err = daemon.invoke("insert_message", vec![], Map::new()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArguments);

        let err = daemon.invoke("pst_counter", vec![], Map::new()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotCallable);

        let err = daemon.set("pst_counter", json!("many")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidValue);
    }

    #[tokio::test]
    async fn test_served_over_the_wire() {
        let mut config = AppConfig::default();
        config.listener.bind_address = "127.0.0.1".to_string();
        config.listener.port = Some(0);
        config.persistence.backend = "memory".to_string();

        let daemon = MessageDaemon::with_poll_interval("MessageDaemon", Duration::from_millis(50));
        let host = DaemonHost::new(daemon, &config).await.unwrap();
        let addr = host.local_addr().to_string();
        let daemon = host.daemon();
        let task = tokio::spawn(host.run());

        let proxy = Proxy::connect("MessageDaemon", addr).await.unwrap();
        let reply = proxy.call("insert_message", vec![json!("hello")]).await.unwrap();
        assert_eq!(reply, json!("Message received!"));
        assert_eq!(proxy.get_value::<u64>("pst_counter").await.unwrap(), 1);

        // Main loop drains the queue
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(daemon.state().unwrap().messages.is_empty());

        proxy.stop().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert!(result.unwrap().unwrap().is_ok());
    }
}
