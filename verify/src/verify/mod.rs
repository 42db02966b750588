use std::pin::pin;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::StreamExt;
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::global::GlobalState;
use crate::verify::job::handle_delivery;

pub(crate) mod job;

pub async fn run(global: Arc<GlobalState>) -> Result<()> {
    let mut consumer = pin!(global.rmq.consume(
        &global.config.broker.queue,
        &global.config.name,
        global.config.broker.prefetch,
    ));

    let shutdown_token = CancellationToken::new();
    let child_token = shutdown_token.child_token();
    let _drop_token = shutdown_token.drop_guard();

    loop {
        select! {
            m = consumer.next() => {
                let Some(m) = m else {
                    return Err(anyhow!("consume stream closed"));
                };

                let m = m.map_err(|e| anyhow!("failed to get message: {}", e))?;

                tokio::spawn(handle_delivery(global.clone(), m, child_token.clone()));
            },
            _ = global.ctx.done() => {
                return Ok(());
            }
        }
    }
}
