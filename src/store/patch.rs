use super::{FieldPath, FieldUpdate, StoreError};
use serde_json::{Map, Value};

/// Applies field updates to a document body in order.
///
/// `Set` creates missing intermediate maps. `Delete` of a missing field is a
/// no-op. Walking through a non-map value is an error.
pub fn apply_updates(data: &mut Value, updates: &[FieldUpdate]) -> Result<(), StoreError> {
    for update in updates {
        match update {
            FieldUpdate::Set(path, value) => set_path(data, path.segments(), value, path)?,
            FieldUpdate::Delete(path) => remove_path(data, path.segments(), path)?,
        }
    }
    Ok(())
}

fn set_path(
    current: &mut Value,
    segments: &[String],
    value: &Value,
    path: &FieldPath,
) -> Result<(), StoreError> {
    let map = as_object(current, path)?;
    match segments {
        [] => Err(StoreError::InvalidPath("empty path".into())),
        [last] => {
            map.insert(last.clone(), value.clone());
            Ok(())
        }
        [head, rest @ ..] => {
            let next = map
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            set_path(next, rest, value, path)
        }
    }
}

fn remove_path(current: &mut Value, segments: &[String], path: &FieldPath) -> Result<(), StoreError> {
    let map = as_object(current, path)?;
    match segments {
        [] => Err(StoreError::InvalidPath("empty path".into())),
        [last] => {
            map.remove(last);
            Ok(())
        }
        [head, rest @ ..] => match map.get_mut(head) {
            Some(next) => remove_path(next, rest, path),
            None => Ok(()),
        },
    }
}

fn as_object<'a>(
    value: &'a mut Value,
    path: &FieldPath,
) -> Result<&'a mut Map<String, Value>, StoreError> {
    value
        .as_object_mut()
        .ok_or_else(|| StoreError::InvalidPath(format!("{} crosses a non-map value", path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_creates_intermediate_maps() {
        let mut data = json!({"displayName": "Gauze"});
        apply_updates(
            &mut data,
            &[FieldUpdate::Set(
                FieldPath::new(["locations", "Tent 2", "qty"]),
                json!(3),
            )],
        )
        .unwrap();
        assert_eq!(data["locations"]["Tent 2"]["qty"], json!(3));
    }

    #[test]
    fn delete_is_noop_for_missing_fields() {
        let mut data = json!({"locations": {"A": {"qty": 1}}});
        apply_updates(
            &mut data,
            &[
                FieldUpdate::Delete(FieldPath::new(["locations", "B"])),
                FieldUpdate::Delete(FieldPath::new(["missing", "deep", "field"])),
            ],
        )
        .unwrap();
        assert_eq!(data, json!({"locations": {"A": {"qty": 1}}}));
    }

    #[test]
    fn delete_removes_map_entry() {
        let mut data = json!({"locations": {"A": {"qty": 1}, "B": {"qty": 0}}});
        apply_updates(
            &mut data,
            &[FieldUpdate::Delete(FieldPath::new(["locations", "B"]))],
        )
        .unwrap();
        assert_eq!(data, json!({"locations": {"A": {"qty": 1}}}));
    }

    #[test]
    fn walking_through_scalar_fails() {
        let mut data = json!({"displayName": "Gauze"});
        let err = apply_updates(
            &mut data,
            &[FieldUpdate::Set(
                FieldPath::new(["displayName", "x"]),
                json!(1),
            )],
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath(_)));
    }
}
