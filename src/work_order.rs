use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A single work order as posted by the picking UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrder {
    pub order_number: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub product_sku: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub warehouse_location: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub design_id: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub custom_info: Option<CustomInfo>,
    #[serde(default)]
    pub ship_to: Option<String>,
}

impl WorkOrder {
    pub fn new(order_number: impl Into<String>) -> Self {
        WorkOrder {
            order_number: order_number.into(),
            name: None,
            product_sku: None,
            sku: None,
            description: None,
            warehouse_location: None,
            batch_id: None,
            design_id: None,
            image_url: None,
            custom_info: None,
            ship_to: None,
        }
    }

    pub fn has_design(&self) -> bool {
        self.design_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }
}

/// Free-form notes attached to an order: either plain text or labelled fields.
/// Field values keep their JSON type; the label prints them as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CustomInfo {
    PlainText(String),
    Fields(IndexMap<String, Value>),
}

/// Request bodies accept either a single work order or an array of them.
#[derive(Debug, Clone, PartialEq)]
pub enum OneOrMany {
    One(Box<WorkOrder>),
    Many(Vec<WorkOrder>),
}

impl OneOrMany {
    /// Job title shown in the print service queue. Arrays always get the
    /// plural form, even with a single element.
    pub fn job_title(&self) -> String {
        match self {
            OneOrMany::One(order) => format!("Work Order - {}", order.order_number),
            OneOrMany::Many(orders) => format!("Work Orders - {} items", orders.len()),
        }
    }

    pub fn into_vec(self) -> Vec<WorkOrder> {
        match self {
            OneOrMany::One(order) => vec![*order],
            OneOrMany::Many(orders) => orders,
        }
    }
}

impl<'de> Deserialize<'de> for OneOrMany {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Array(items) => orders_from_values(items)
                .map(OneOrMany::Many)
                .map_err(D::Error::custom),
            value => order_from_value(value)
                .map(|order| OneOrMany::One(Box::new(order)))
                .map_err(D::Error::custom),
        }
    }
}

/// Deserialize a list of work orders where every element must be a JSON object.
pub fn deserialize_orders<'de, D>(deserializer: D) -> Result<Vec<WorkOrder>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => orders_from_values(items).map_err(D::Error::custom),
        other => Err(D::Error::custom(format!(
            "expected an array of work orders, got {}",
            json_kind(&other)
        ))),
    }
}

// Derived struct deserialization also accepts positional arrays, so objects
// are checked before handing over to serde.
fn order_from_value(value: Value) -> Result<WorkOrder, String> {
    match value {
        Value::Object(_) => serde_json::from_value(value).map_err(|e| e.to_string()),
        other => Err(format!(
            "expected a work order object, got {}",
            json_kind(&other)
        )),
    }
}

fn orders_from_values(items: Vec<Value>) -> Result<Vec<WorkOrder>, String> {
    items.into_iter().map(order_from_value).collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_order() {
        let order: WorkOrder = serde_json::from_str(r#"{"orderNumber": "12543"}"#).unwrap();
        assert_eq!(order.order_number, "12543");
        assert!(order.ship_to.is_none());
        assert!(order.custom_info.is_none());
    }

    #[test]
    fn test_missing_order_number_is_rejected() {
        let result: Result<WorkOrder, _> = serde_json::from_str(r#"{"name": "Mug"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_custom_info_variants() {
        let order: WorkOrder =
            serde_json::from_str(r#"{"orderNumber": "1", "customInfo": "line1\nline2"}"#).unwrap();
        assert_eq!(
            order.custom_info,
            Some(CustomInfo::PlainText("line1\nline2".to_string()))
        );

        let order: WorkOrder = serde_json::from_str(
            r#"{"orderNumber": "1", "customInfo": {"giftMessage": "Happy birthday", "color": "", "qty": 3, "rush": true}}"#,
        )
        .unwrap();
        match order.custom_info {
            Some(CustomInfo::Fields(fields)) => {
                let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
                assert_eq!(keys, vec!["giftMessage", "color", "qty", "rush"]);
                assert_eq!(fields["qty"], serde_json::json!(3));
            }
            other => panic!("expected fields, got {:?}", other),
        }
    }

    #[test]
    fn test_one_or_many() {
        let one: OneOrMany = serde_json::from_str(r#"{"orderNumber": "1"}"#).unwrap();
        assert_eq!(one.into_vec().len(), 1);

        let many: OneOrMany =
            serde_json::from_str(r#"[{"orderNumber": "1"}, {"orderNumber": "2"}]"#).unwrap();
        assert_eq!(many.into_vec().len(), 2);
    }

    #[test]
    fn test_positional_arrays_are_not_orders() {
        let result: Result<OneOrMany, _> = serde_json::from_str(r#"["12543", "Mug"]"#);
        assert!(result.is_err());

        let result: Result<OneOrMany, _> = serde_json::from_str(r#"[["12543", "Mug"]]"#);
        assert!(result.is_err());

        let result: Result<OneOrMany, _> = serde_json::from_str(r#""12543""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_orders_requires_objects() {
        #[derive(Deserialize)]
        struct Body {
            #[serde(deserialize_with = "deserialize_orders")]
            orders: Vec<WorkOrder>,
        }

        let body: Body =
            serde_json::from_str(r#"{"orders": [{"orderNumber": "1"}, {"orderNumber": "2"}]}"#)
                .unwrap();
        assert_eq!(body.orders.len(), 2);

        assert!(serde_json::from_str::<Body>(r#"{"orders": [["1", "Mug"]]}"#).is_err());
        assert!(serde_json::from_str::<Body>(r#"{"orders": {"orderNumber": "1"}}"#).is_err());
    }

    #[test]
    fn test_job_title_follows_request_shape() {
        let single: OneOrMany = serde_json::from_str(r#"{"orderNumber": "12543"}"#).unwrap();
        assert_eq!(single.job_title(), "Work Order - 12543");

        let one_element: OneOrMany = serde_json::from_str(r#"[{"orderNumber": "1"}]"#).unwrap();
        assert_eq!(one_element.job_title(), "Work Orders - 1 items");

        let batch: OneOrMany =
            serde_json::from_str(r#"[{"orderNumber": "1"}, {"orderNumber": "2"}, {"orderNumber": "3"}]"#)
                .unwrap();
        assert_eq!(batch.job_title(), "Work Orders - 3 items");
    }

    #[test]
    fn test_blank_design_id_does_not_count() {
        let mut order = WorkOrder::new("1");
        assert!(!order.has_design());
        order.design_id = Some("  ".to_string());
        assert!(!order.has_design());
        order.design_id = Some("D-7".to_string());
        assert!(order.has_design());
    }
}
