use serde_json::Value;

/// Masks secrets and subscriber phone numbers in a JSON payload before it is logged.
pub fn sanitize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| {
                    let val = if is_sensitive_field(key) {
                        mask_value(val)
                    } else {
                        sanitize_json(val)
                    };
                    (key.clone(), val)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_json).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_field(key: &str) -> bool {
    matches!(
        key.to_lowercase().as_str(),
        "password"
            | "secret"
            | "secret_key"
            | "paystack_secret_key"
            | "token"
            | "api_key"
            | "authorization"
            | "access_code"
            | "beneficiary"
            | "beneficiary_number"
            | "receiver_number"
            | "phone"
    )
}

fn mask_value(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > 8 => {
            let head: String = s.chars().take(3).collect();
            let tail: String = s.chars().rev().take(2).collect::<Vec<_>>().into_iter().rev().collect();
            Value::String(format!("{}****{}", head, tail))
        }
        _ => Value::String("****".to_string()),
    }
}
