//! Reference `RpcTarget` used by `rpc_parent`'s scenario tests and by
//! anyone experimenting with the engine from the command line. Exercises
//! every scenario in spec.md §8: a plain call (S1), property sync (S2), a
//! slow method for timeout/retry (S3), a crash primitive (S4), a callback
//! argument (S5), event emission (S6), buffer round-tripping (S7), and a
//! thrown error with a cause chain (S8).
//!
//! Not part of the crate's public API — this binary is spawned as a
//! sibling process, never linked against.

use rpc_protocol::{ErrorValue, Value};
use rpc_worker::{CallbackChannel, RpcTarget, TargetError, WorkerRuntime};

struct DemoTarget {
    counter: i64,
    events: Vec<(String, Vec<Value>)>,
}

impl RpcTarget for DemoTarget {
    fn construct(args: Vec<Value>) -> Result<Self, TargetError> {
        let counter = match args.first() {
            Some(Value::Int(n)) => *n,
            Some(other) => {
                return Err(TargetError::InvalidArgs(format!(
                    "expected initial counter as an int, got `{}`",
                    other.kind()
                )))
            }
            None => 0,
        };
        Ok(Self {
            counter,
            events: Vec::new(),
        })
    }

    fn methods() -> Vec<String> {
        vec![
            "add".to_string(),
            "incrementCounter".to_string(),
            "sleepMs".to_string(),
            "crash".to_string(),
            "invokeMultiple".to_string(),
            "emitProgress".to_string(),
            "processBuffer".to_string(),
            "throwValidationError".to_string(),
        ]
    }

    async fn call(
        &mut self,
        method: &str,
        args: Vec<Value>,
        callbacks: &CallbackChannel,
    ) -> Result<Value, Value> {
        match method {
            "add" => {
                let a = expect_int(&args, 0)?;
                let b = expect_int(&args, 1)?;
                Ok(Value::Int(a + b))
            }
            "incrementCounter" => {
                self.counter += 1;
                Ok(Value::Int(self.counter))
            }
            "sleepMs" => {
                let ms = expect_int(&args, 0)?;
                tokio::time::sleep(std::time::Duration::from_millis(ms.max(0) as u64)).await;
                Ok(Value::Null)
            }
            "crash" => {
                // Simulates an unrecoverable worker fault (spec.md §8 S4):
                // the process exits before a Response is ever encoded.
                std::process::exit(17);
            }
            "invokeMultiple" => {
                let callback_id = match args.first() {
                    Some(Value::Callback(cb)) => cb.id,
                    _ => {
                        return Err(plain_error(
                            "invokeMultiple expects a callback as its first argument",
                        ))
                    }
                };
                let count = expect_int(&args, 1)?;
                for i in 0..count {
                    callbacks.invoke(callback_id, vec![Value::Int(i)]).await?;
                }
                Ok(Value::Int(count))
            }
            "emitProgress" => {
                let count = expect_int(&args, 0)?;
                for i in 0..count {
                    self.events
                        .push(("progress".to_string(), vec![Value::Int(i)]));
                }
                Ok(Value::Int(count))
            }
            "processBuffer" => match args.into_iter().next() {
                Some(Value::Bytes(bytes)) => {
                    Ok(Value::Bytes(bytes.into_iter().map(|b| b ^ 0xff).collect()))
                }
                _ => Err(plain_error("processBuffer expects a byte buffer")),
            },
            "throwValidationError" => {
                let cause = ErrorValue::new("IoError", "disk full");
                let mut err = ErrorValue::new("ValidationError", "write failed");
                err.properties
                    .push(("field".to_string(), Value::Str("name".to_string())));
                err.properties.push((
                    "constraints".to_string(),
                    Value::Array(vec![Value::Str("required".to_string())]),
                ));
                err.cause = Some(Box::new(Value::Error(Box::new(cause))));
                Err(Value::Error(Box::new(err)))
            }
            other => Err(plain_error(&format!("unhandled method `{other}`"))),
        }
    }

    fn properties(&self) -> Vec<(String, Value)> {
        vec![("counter".to_string(), Value::Int(self.counter))]
    }

    fn supports_events(&self) -> bool {
        true
    }

    fn drain_events(&mut self) -> Vec<(String, Vec<Value>)> {
        std::mem::take(&mut self.events)
    }
}

fn expect_int(args: &[Value], index: usize) -> Result<i64, Value> {
    match args.get(index) {
        Some(Value::Int(n)) => Ok(*n),
        Some(other) => Err(plain_error(&format!(
            "argument {index}: expected int, got `{}`",
            other.kind()
        ))),
        None => Err(plain_error(&format!("missing argument {index}"))),
    }
}

fn plain_error(message: &str) -> Value {
    Value::Error(Box::new(ErrorValue::new("Error", message)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    WorkerRuntime::run::<DemoTarget>().await?;
    Ok(())
}
