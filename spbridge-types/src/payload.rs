pub use crate::generated::sparkplug_payload::{payload::*, *};

pub use prost::Message;

impl Metric {
    pub fn new() -> Self {
        Self {
            name: None,
            alias: None,
            timestamp: None,
            datatype: None,
            is_historical: None,
            is_transient: None,
            is_null: Some(true),
            value: None,
        }
    }

    /// Create a named `Double` metric, the representation used for every sampled tag value.
    pub fn double<S: Into<String>>(name: S, value: f64, timestamp: u64) -> Self {
        let mut metric = Self::new();
        metric
            .set_name(name.into())
            .set_datatype(DataType::Double)
            .set_timestamp(timestamp)
            .set_value(metric::Value::DoubleValue(value));
        metric
    }

    pub fn set_name(&mut self, name: String) -> &mut Self {
        self.name = Some(name);
        self
    }

    pub fn set_datatype(&mut self, datatype: DataType) -> &mut Self {
        self.datatype = Some(datatype as u32);
        self
    }

    pub fn set_timestamp(&mut self, timestamp: u64) -> &mut Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn set_historical(&mut self, is_historical: bool) -> &mut Self {
        self.is_historical = Some(is_historical);
        self
    }

    pub fn set_value(&mut self, value: metric::Value) -> &mut Self {
        self.value = Some(value);
        self.is_null = None;
        self
    }
}

impl Payload {
    /// Flag every metric in the payload as historical.
    ///
    /// Used when replaying buffered data so consumers do not treat it as a current value.
    pub fn mark_historical(&mut self) {
        for metric in self.metrics.iter_mut() {
            metric.set_historical(true);
        }
    }
}

impl From<Payload> for Vec<u8> {
    fn from(value: Payload) -> Self {
        value.encode_to_vec()
    }
}

impl TryFrom<u32> for DataType {
    type Error = ();

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        let v = i32::try_from(v).map_err(|_| ())?;
        DataType::try_from(v).map_err(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_metric() {
        let metric = Metric::double("temp", 21.5, 1000);
        assert_eq!(metric.name.as_deref(), Some("temp"));
        assert_eq!(metric.datatype, Some(DataType::Double as u32));
        assert_eq!(metric.timestamp, Some(1000));
        assert_eq!(metric.value, Some(metric::Value::DoubleValue(21.5)));
        assert_eq!(metric.is_null, None);
        assert_eq!(metric.is_historical, None);
    }

    #[test]
    fn new_metric_is_null_until_valued() {
        let mut metric = Metric::new();
        assert_eq!(metric.is_null, Some(true));
        metric.set_value(metric::Value::BooleanValue(true));
        assert_eq!(metric.is_null, None);
        assert_eq!(Metric::default().is_null, None);
    }

    #[test]
    fn mark_historical_flags_every_metric() {
        let mut payload = Payload {
            timestamp: Some(1),
            metrics: vec![Metric::double("a", 1.0, 1), Metric::double("b", 2.0, 1)],
            seq: Some(3),
            uuid: None,
            body: None,
        };
        payload.mark_historical();
        assert!(payload
            .metrics
            .iter()
            .all(|m| m.is_historical == Some(true)));
    }

    #[test]
    fn payload_survives_encoding() {
        let payload = Payload {
            timestamp: Some(42),
            metrics: vec![Metric::double("pressure", 3.25, 42)],
            seq: Some(7),
            uuid: None,
            body: None,
        };
        let bytes: Vec<u8> = payload.clone().into();
        assert_eq!(Payload::decode(bytes.as_slice()).unwrap(), payload);
    }

    #[test]
    fn datatype_from_u32() {
        assert_eq!(DataType::try_from(10_u32), Ok(DataType::Double));
        assert_eq!(DataType::try_from(11_u32), Ok(DataType::Boolean));
        assert!(DataType::try_from(999_u32).is_err());
        assert!(DataType::try_from(u32::MAX).is_err());
    }
}
