//! Consumer loop: drain a subscription, hand each message to a handler,
//! acknowledge it.

use crate::client::Connection;
use crate::error::{Result, StompError};
use crate::subscription::{AckMode, Message, Subscription};

/// Read `subscription` until it ends.
///
/// Each regular message goes to `handler` first, then is acknowledged
/// when the ack mode requires it. Ack failures are logged and do not stop
/// the loop. Returns the subscription's terminal error, or
/// [`StompError::AlreadyCompleted`] if the queue closed without one.
pub async fn consume<H>(subscription: &mut Subscription, mut handler: H) -> Result<()>
where
    H: FnMut(&Message),
{
    loop {
        let message = subscription.read().await?;

        if let Some(error) = message.error() {
            return Err(StompError::Subscription(error.clone()));
        }

        handler(&message);

        if message.should_ack() {
            if let Err(e) = subscription.ack(&message).await {
                tracing::warn!(
                    subscription = %subscription.id(),
                    error = %e,
                    "could not ack message"
                );
            }
        }
    }
}

/// Subscribe to `destination` on `connection` and consume it.
pub async fn listen<H>(
    connection: Connection,
    destination: String,
    ack_mode: AckMode,
    handler: H,
) -> Result<()>
where
    H: FnMut(&Message),
{
    let mut subscription = connection.subscribe(&destination, ack_mode).await?;
    tracing::info!(
        destination = %destination,
        subscription = %subscription.id(),
        ack = %ack_mode,
        "subscribed"
    );
    consume(&mut subscription, handler).await
}
