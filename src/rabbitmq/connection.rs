use std::sync::Arc;

use tokio::time::sleep;
use tokio_rustls::rustls::ClientConfig as TlsConfig;
use tracing::{debug, error, info, warn};

use super::errors::{ClientError, Result};
use super::reconnect::ReconnectState;
use super::tls::{hardened_client_config, is_secure_url};
use super::transport::{BrokerChannel, BrokerConnection, ConnectionParams, Connector};
use crate::config::AmqpConfig;

/// Owns the single connection/channel pair of a client.
pub struct ConnectionManager {
    config: AmqpConfig,
    connector: Arc<dyn Connector>,
    connection: Option<Box<dyn BrokerConnection>>,
    channel: Option<Arc<dyn BrokerChannel>>,
    channel_generation: u64,
    reconnect: ReconnectState,
    tls: Option<Arc<TlsConfig>>,
}

impl ConnectionManager {
    pub fn new(config: AmqpConfig, connector: Arc<dyn Connector>) -> Self {
        let reconnect = ReconnectState::new(config.max_reconnect_delay_seconds);
        ConnectionManager {
            config,
            connector,
            connection: None,
            channel: None,
            channel_generation: 0,
            reconnect,
            tls: None,
        }
    }

    pub fn config(&self) -> &AmqpConfig {
        &self.config
    }

    /// Open a connection and a channel on it.
    ///
    /// Authentication and configuration failures are returned on the first
    /// attempt. Anything else is retried forever with a linear backoff when
    /// `retry_if_failed` is set, and returned immediately otherwise.
    pub async fn connect(&mut self, retry_if_failed: bool) -> Result<()> {
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            info!(attempt, connection_name = %self.config.connection_name, "Attempting to connect to RabbitMQ");

            match self.open().await {
                Ok(()) => {
                    self.reconnect.reset();
                    info!(attempt, generation = self.channel_generation, "Successfully connected to RabbitMQ");
                    return Ok(());
                }
                Err(err) if !err.is_retryable() => {
                    error!(attempt, "Failed to connect to RabbitMQ, not retrying: {}", err);
                    return Err(err);
                }
                Err(err) if !retry_if_failed => {
                    error!(attempt, "Failed to connect to RabbitMQ: {}", err);
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.reconnect.next_delay();
                    error!(
                        attempt,
                        delay_secs = delay.as_secs(),
                        "Failed to connect to RabbitMQ: {}",
                        err
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn open(&mut self) -> Result<()> {
        // Never hold two connections at once.
        self.close().await;

        let params = self.connection_params()?;
        let connection = self.connector.connect(&params).await?;
        let channel = match connection.open_channel().await {
            Ok(channel) => channel,
            Err(err) => {
                if let Err(close_err) = connection.close().await {
                    debug!("Ignoring close error after failed channel open: {}", close_err);
                }
                return Err(err);
            }
        };

        self.connection = Some(connection);
        self.install_channel(channel);
        Ok(())
    }

    fn connection_params(&mut self) -> Result<ConnectionParams> {
        let tls = if is_secure_url(&self.config.url) {
            match &self.tls {
                Some(tls) => Some(tls.clone()),
                None => {
                    let tls = hardened_client_config(self.config.ca_cert_path.as_deref())?;
                    self.tls = Some(tls.clone());
                    Some(tls)
                }
            }
        } else {
            None
        };

        Ok(ConnectionParams {
            url: self.config.url.clone(),
            connection_name: self.config.connection_name.clone(),
            connect_timeout: self.config.connect_timeout(),
            tls,
        })
    }

    fn install_channel(&mut self, channel: Arc<dyn BrokerChannel>) {
        self.channel_generation += 1;
        self.channel = Some(channel);
    }

    pub fn is_connection_alive(&self) -> bool {
        self.connection
            .as_ref()
            .map_or(false, |connection| connection.is_open())
    }

    pub fn is_channel_open(&self) -> bool {
        self.channel.as_ref().map_or(false, |channel| channel.is_open())
    }

    /// Make sure a usable connection/channel pair exists. Returns `true` when
    /// a new connection had to be opened.
    pub async fn ensure_open(&mut self) -> Result<bool> {
        if !self.is_connection_alive() {
            self.connect(true).await?;
            return Ok(true);
        }
        if !self.is_channel_open() {
            self.reconnect_channel().await?;
        }
        Ok(false)
    }

    /// Replace only the channel when the connection is still usable, otherwise
    /// go through a full close/connect cycle.
    pub async fn reconnect_channel(&mut self) -> Result<()> {
        if !self.is_connection_alive() {
            warn!("Connection is gone, reconnecting instead of reopening the channel");
            self.close().await;
            return self.connect(true).await;
        }

        if let Some(old) = self.channel.take() {
            if old.is_open() {
                if let Err(err) = old.close().await {
                    debug!("Ignoring error while closing stale channel: {}", err);
                }
            }
        }

        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| ClientError::Connection("No active connection".to_string()))?;
        let channel = connection.open_channel().await?;
        self.install_channel(channel);
        info!(generation = self.channel_generation, "Channel reopened");
        Ok(())
    }

    pub fn channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        self.channel
            .clone()
            .ok_or_else(|| ClientError::ChannelState("No open channel".to_string()))
    }

    /// Incremented every time a channel is opened.
    pub fn channel_generation(&self) -> u64 {
        self.channel_generation
    }

    pub fn reconnect_delay_secs(&self) -> u64 {
        self.reconnect.delay_secs()
    }

    /// Close the connection if it is open and forget both references.
    /// Safe to call any number of times.
    pub async fn close(&mut self) {
        self.channel = None;

        if let Some(connection) = self.connection.take() {
            if connection.is_open() {
                info!("Closing RabbitMQ connection gracefully");
                if let Err(err) = connection.close().await {
                    warn!("Error while closing RabbitMQ connection: {}", err);
                }
            }
        }
    }
}
