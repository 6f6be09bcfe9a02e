use std::time::Duration;

use rumqttc::v5::{mqttbytes::v5::ConnectProperties, MqttOptions as RuMqttOptions};

/// Broker connection options.
pub struct MqttOptions {
    pub broker_addr: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub keep_alive: Duration,
}

impl MqttOptions {
    pub fn new<S: Into<String>, S1: Into<String>>(client_id: S, addr: S1, port: u16) -> Self {
        Self {
            broker_addr: addr.into(),
            port,
            client_id: client_id.into(),
            credentials: None,
            keep_alive: Duration::from_secs(60),
        }
    }

    pub fn with_credentials<S: Into<String>, S1: Into<String>>(
        mut self,
        username: S,
        password: S1,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Produce the rumqtt options with the settings Sparkplug requires applied.
    pub(crate) fn into_rumqtt(self) -> RuMqttOptions {
        let mut options = RuMqttOptions::new(self.client_id, self.broker_addr, self.port);
        let mut properties = ConnectProperties::new();
        /* Sparkplug requires session expiry interval to be 0 */
        properties.session_expiry_interval = Some(0);

        options
            .set_keep_alive(self.keep_alive)
            .set_clean_start(true)
            .set_connect_properties(properties);

        if let Some((username, password)) = self.credentials {
            options.set_credentials(username, password);
        }
        options
    }
}
