use super::constants::{DBIRTH, DCMD, DDATA, DDEATH, NBIRTH, NCMD, NDATA, NDEATH, SPBV01};

#[derive(Clone, Debug, PartialEq)]
pub enum DeviceMessage {
    DBirth,
    DDeath,
    DData,
    DCmd,
}

impl DeviceMessage {
    fn as_str(&self) -> &str {
        match self {
            DeviceMessage::DBirth => DBIRTH,
            DeviceMessage::DDeath => DDEATH,
            DeviceMessage::DData => DDATA,
            DeviceMessage::DCmd => DCMD,
        }
    }

    fn from_type_str(value: &str) -> Option<Self> {
        match value {
            DBIRTH => Some(DeviceMessage::DBirth),
            DDEATH => Some(DeviceMessage::DDeath),
            DDATA => Some(DeviceMessage::DData),
            DCMD => Some(DeviceMessage::DCmd),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeMessage {
    NBirth,
    NDeath,
    NData,
    NCmd,
}

impl NodeMessage {
    fn as_str(&self) -> &str {
        match self {
            NodeMessage::NBirth => NBIRTH,
            NodeMessage::NDeath => NDEATH,
            NodeMessage::NData => NDATA,
            NodeMessage::NCmd => NCMD,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeTopic {
    pub topic: String,
    pub message_type: NodeMessage,
}

impl NodeTopic {
    pub fn new(group_id: &str, message_type: NodeMessage, node_id: &str) -> Self {
        Self {
            topic: node_topic(group_id, &message_type, node_id),
            message_type,
        }
    }

    pub fn get_publish_quality_retain(&self) -> (QoS, bool) {
        match self.message_type {
            NodeMessage::NBirth => (QoS::AtMostOnce, false),
            NodeMessage::NData => (QoS::AtMostOnce, false),
            NodeMessage::NCmd => (QoS::AtMostOnce, false),
            NodeMessage::NDeath => (QoS::AtLeastOnce, false),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceTopic {
    pub topic: String,
    pub message_type: DeviceMessage,
}

impl DeviceTopic {
    pub fn new(group_id: &str, message_type: DeviceMessage, node_id: &str, device_id: &str) -> Self {
        Self {
            topic: device_topic(group_id, &message_type, node_id, device_id),
            message_type,
        }
    }

    /// Parse a full device topic string, e.g. `spBv1.0/group/DDATA/node/device`.
    ///
    /// Returns `None` if the string is not a well formed Sparkplug device topic.
    pub fn parse(topic: &str) -> Option<Self> {
        let mut parts = topic.split('/');
        if parts.next()? != SPBV01 {
            return None;
        }
        let group_id = parts.next()?;
        let message_type = DeviceMessage::from_type_str(parts.next()?)?;
        let node_id = parts.next()?;
        let device_id = parts.next()?;
        if parts.next().is_some() || [group_id, node_id, device_id].iter().any(|p| p.is_empty()) {
            return None;
        }
        Some(Self {
            topic: topic.to_string(),
            message_type,
        })
    }

    /// The device id segment of the topic
    pub fn device_id(&self) -> &str {
        self.topic.rsplit('/').next().unwrap_or_default()
    }

    pub fn get_publish_quality_retain(&self) -> (QoS, bool) {
        match self.message_type {
            DeviceMessage::DBirth => (QoS::AtLeastOnce, false),
            DeviceMessage::DData => (QoS::AtMostOnce, false),
            DeviceMessage::DCmd => (QoS::AtMostOnce, false),
            DeviceMessage::DDeath => (QoS::AtLeastOnce, false),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Topic {
    NodeTopic(NodeTopic),
    DeviceTopic(DeviceTopic),
}

impl From<Topic> for String {
    fn from(value: Topic) -> Self {
        match value {
            Topic::NodeTopic(node_topic) => node_topic.topic,
            Topic::DeviceTopic(device_topic) => device_topic.topic,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TopicFilter {
    pub topic: Topic,
    pub qos: QoS,
}

impl TopicFilter {
    pub fn new(topic: Topic) -> Self {
        Self::new_with_qos(topic, QoS::AtMostOnce)
    }

    pub fn new_with_qos(topic: Topic, qos: QoS) -> Self {
        Self { topic, qos }
    }
}

pub fn node_topic_raw(group_id: &str, message_type: &str, node_id: &str) -> String {
    format!("{}/{}/{}/{}", SPBV01, group_id, message_type, node_id)
}

pub fn node_topic(group_id: &str, message_type: &NodeMessage, node_id: &str) -> String {
    node_topic_raw(group_id, message_type.as_str(), node_id)
}

pub fn device_topic(
    group_id: &str,
    message_type: &DeviceMessage,
    node_id: &str,
    device_id: &str,
) -> String {
    format!(
        "{}/{}/{}/{}/{}",
        SPBV01,
        group_id,
        message_type.as_str(),
        node_id,
        device_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_topic_format() {
        let topic = DeviceTopic::new("plant", DeviceMessage::DData, "gw1", "device-modbus-1");
        assert_eq!(topic.topic, "spBv1.0/plant/DDATA/gw1/device-modbus-1");
        assert_eq!(topic.device_id(), "device-modbus-1");
    }

    #[test]
    fn node_topic_format() {
        let topic = NodeTopic::new("plant", NodeMessage::NBirth, "gw1");
        assert_eq!(topic.topic, "spBv1.0/plant/NBIRTH/gw1");
    }

    #[test]
    fn parse_device_topic() {
        let parsed = DeviceTopic::parse("spBv1.0/plant/DDATA/gw1/dev").unwrap();
        assert_eq!(
            parsed,
            DeviceTopic::new("plant", DeviceMessage::DData, "gw1", "dev")
        );
        assert_eq!(parsed.device_id(), "dev");
    }

    #[test]
    fn parse_rejects_malformed_topics() {
        assert!(DeviceTopic::parse("spBv1.0/plant/NDATA/gw1/dev").is_none());
        assert!(DeviceTopic::parse("spBv1.0/plant/DDATA/gw1").is_none());
        assert!(DeviceTopic::parse("spBv1.0/plant/DDATA/gw1/dev/extra").is_none());
        assert!(DeviceTopic::parse("spAv1.0/plant/DDATA/gw1/dev").is_none());
        assert!(DeviceTopic::parse("spBv1.0//DDATA/gw1/dev").is_none());
        assert!(DeviceTopic::parse("").is_none());
    }
}
