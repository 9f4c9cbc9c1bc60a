use std::time::Duration;

use tracing::{info, warn};

use crate::database::payments::OrderPaid;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Fire-and-forget "order paid" events. Delivery failures are logged and
/// dropped; the receiver deduplicates on `order_id`.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
    url: Option<String>,
}

impl Notifier {
    pub fn new(url: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(DELIVERY_TIMEOUT).build()?;
        Ok(Self { client, url })
    }

    pub fn order_paid(&self, event: OrderPaid) {
        let Some(url) = self.url.clone() else {
            info!(order_id = event.order_id, order_reference = event.order_reference.as_str(), "order paid");
            return;
        };
        let client = self.client.clone();
        actix_web::rt::spawn(async move {
            if let Err(e) = deliver(&client, &url, &event).await {
                warn!(order_id = event.order_id, error = %e, "order paid notification not delivered");
            }
        });
    }
}

async fn deliver(client: &reqwest::Client, url: &str, event: &OrderPaid) -> Result<(), reqwest::Error> {
    client
        .post(url)
        .json(&serde_json::json!({ "type": "order.paid", "data": event }))
        .send()
        .await?
        .error_for_status()?;
    info!(order_id = event.order_id, "order paid notification delivered");
    Ok(())
}
