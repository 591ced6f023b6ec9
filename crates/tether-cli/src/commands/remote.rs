use std::time::Duration;

use anyhow::Result;
use serde_json::{Map, Value};

use tether_core::{Proxy, Remote};

/// Name shown for proxies created from the command line
const PROXY_NAME: &str = "tether";

/// Parse a command line value as JSON, falling back to a plain string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_value(value: &Value) -> Result<()> {
    match value {
        Value::String(s) => println!("{}", s),
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    Ok(())
}

async fn connect(address: &str) -> Result<Proxy> {
    Ok(Proxy::connect(PROXY_NAME, address).await?)
}

pub async fn get(address: &str, attribute: &str) -> Result<()> {
    let proxy = connect(address).await?;
    match proxy.get(attribute).await? {
        Remote::Value(value) => print_value(&value)?,
        Remote::Handle(handle) => println!("<method {}>", handle.target_attribute()),
    }
    Ok(())
}

pub async fn set(address: &str, attribute: &str, raw: &str) -> Result<()> {
    let proxy = connect(address).await?;
    proxy.set(attribute, parse_value(raw)).await?;
    println!("Set {}", attribute);
    Ok(())
}

pub async fn call(
    address: &str,
    method: &str,
    args: &[String],
    timeout: Option<f64>,
) -> Result<()> {
    let proxy = connect(address).await?;
    let args = args.iter().map(|raw| parse_value(raw)).collect();
    let timeout = timeout.map(Duration::from_secs_f64);

    let value = proxy.call_with(method, args, Map::new(), timeout).await?;
    if !value.is_null() {
        print_value(&value)?;
    }
    Ok(())
}

pub async fn stop(address: &str) -> Result<()> {
    let proxy = connect(address).await?;
    proxy.stop().await?;
    println!("Stop requested for daemon at {}", address);
    Ok(())
}
