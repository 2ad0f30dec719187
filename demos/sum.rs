use serde::{Deserialize, Serialize};
use std::time::Duration;
use xbus::{AwaitSpec, Channel, ChannelConfig, EventSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SumRequest {
    a: i32,
    b: i32,
}

struct Sum;

impl AwaitSpec for Sum {
    const ACTION: &'static str = "sum";
    type Payload = SumRequest;
    type Output = i32;
}

struct StatusChanged;

impl EventSpec for StatusChanged {
    const ACTION: &'static str = "statusChanged";
    type Payload = String;
}

const CHANNEL_NAME: &str = "sum_example";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // Instance X answers "sum"; instance Y asks and never answers itself.
    let x = xbus::create(CHANNEL_NAME)?;
    let y = Channel::with_config(
        CHANNEL_NAME,
        ChannelConfig::default()
            .with_request_timeout(Duration::from_millis(500))
            .with_self_delivery(false),
    )?;

    x.serve::<Sum, std::convert::Infallible, _, _>(|req| async move {
        println!("[X] sum({}, {})", req.a, req.b);
        Ok(req.a + req.b)
    });
    x.listen::<StatusChanged, _>(|status| println!("[X] status is now {status}"));

    y.emit::<StatusChanged>(&"ready".to_string())?;

    let five = y.request::<Sum>(&SumRequest { a: 2, b: 3 }).await?;
    println!("[Y] sum = {five}");

    x.destroy();
    match y.request::<Sum>(&SumRequest { a: 2, b: 3 }).await {
        Ok(value) => println!("[Y] unexpected answer {value}"),
        Err(e) => println!("[Y] after X left: {e}"),
    }

    y.destroy();
    Ok(())
}
