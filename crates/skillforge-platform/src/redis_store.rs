use anyhow::Result;
use async_trait::async_trait;
use redis::{AsyncCommands, Client};

use skillforge_core::{CheckoutBinding, CheckoutStore};

// Pending checkout bindings are shared across gateway instances and must
// survive restarts, so they live in Redis rather than process memory. Every
// write carries a TTL; abandoned checkouts expire on their own.
#[derive(Clone)]
pub struct RedisCheckoutStore {
    client: Client,
    ttl_seconds: u64,
}

impl RedisCheckoutStore {
    pub fn connect(redis_url: &str, ttl_seconds: u64) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self {
            client,
            ttl_seconds,
        })
    }

    fn key(order_id: &str) -> String {
        format!("checkout:binding:{order_id}")
    }
}

#[async_trait]
impl CheckoutStore for RedisCheckoutStore {
    async fn put(&self, order_id: &str, binding: &CheckoutBinding) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(binding)?;
        let _: () = connection
            .set_ex(Self::key(order_id), serialized, self.ttl_seconds)
            .await?;
        Ok(())
    }

    async fn get(&self, order_id: &str) -> Result<Option<CheckoutBinding>> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = connection.get(Self::key(order_id)).await?;
        value
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(Into::into)
    }

    // GETDEL makes remove-and-return atomic on the Redis side, so concurrent
    // confirmations for the same order resolve to exactly one winner.
    async fn take(&self, order_id: &str) -> Result<Option<CheckoutBinding>> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = connection.get_del(Self::key(order_id)).await?;
        value
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(Into::into)
    }

    async fn delete(&self, order_id: &str) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let _: i64 = connection.del(Self::key(order_id)).await?;
        Ok(())
    }
}
