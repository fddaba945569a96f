//! Ordered record of the responses observed during one scenario.
//!
//! Positions are 1-based and follow logical order, which
//! [`ResponseHistory::move_to_front`] may permute.

use crate::error::{EngineError, EngineResult};
use crate::model::ResponseRecord;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ResponseHistory {
    records: Vec<ResponseRecord>,
}

impl ResponseHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Append a record; it becomes the current one.
    pub fn push(&mut self, record: ResponseRecord) {
        self.records.push(record);
        debug!(position = self.records.len(), "recorded response");
    }

    pub fn get(&self, position: usize) -> EngineResult<&ResponseRecord> {
        let idx = self.index_of(position)?;
        Ok(&self.records[idx])
    }

    /// Positive offsets are absolute positions; negative offsets count
    /// back from the current record (`-1` is current).
    pub fn get_relative(&self, offset: i64) -> EngineResult<&ResponseRecord> {
        let len = self.records.len() as i64;
        let position = if offset < 0 { len + offset + 1 } else { offset };
        if position < 1 || position > len {
            return Err(EngineError::OutOfRange {
                what: "response",
                position: offset,
                len: self.records.len(),
            });
        }
        Ok(&self.records[(position - 1) as usize])
    }

    pub fn current(&self) -> EngineResult<&ResponseRecord> {
        self.records.last().ok_or(EngineError::Empty)
    }

    /// Remove the record at `position` and re-append it, making it
    /// current. Other records keep their relative order.
    pub fn move_to_front(&mut self, position: usize) -> EngineResult<()> {
        let idx = self.index_of(position)?;
        let record = self.records.remove(idx);
        self.records.push(record);
        debug!(position, "moved response to front");
        Ok(())
    }

    /// Element `index` (1-based) of the list body at `position`.
    ///
    /// The element is returned as a virtual record carrying the parent's
    /// status and headers; the history itself is left untouched.
    pub fn extract_element(
        &self,
        position: usize,
        index: usize,
    ) -> EngineResult<ResponseRecord> {
        let record = self.get(position)?;
        let items = match &record.body {
            Value::Array(items) => items,
            _ => return Err(EngineError::NotAList { position }),
        };
        if index < 1 || index > items.len() {
            return Err(EngineError::OutOfRange {
                what: "element",
                position: index as i64,
                len: items.len(),
            });
        }
        Ok(ResponseRecord {
            status: record.status,
            body: items[index - 1].clone(),
            headers: record.headers.clone(),
        })
    }

    fn index_of(&self, position: usize) -> EngineResult<usize> {
        if position < 1 || position > self.records.len() {
            return Err(EngineError::OutOfRange {
                what: "response",
                position: position as i64,
                len: self.records.len(),
            });
        }
        Ok(position - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(status: u16, body: Value) -> ResponseRecord {
        ResponseRecord::new(status, body)
    }

    fn history_of(n: u16) -> ResponseHistory {
        let mut history = ResponseHistory::new();
        for i in 1..=n {
            history.push(record(200 + i, json!({ "n": i })));
        }
        history
    }

    #[test]
    fn test_last_position_is_most_recent_push() {
        let mut history = ResponseHistory::new();
        for i in 0..5u16 {
            let r = record(200, json!({ "i": i }));
            history.push(r.clone());
            assert_eq!(history.get(history.len()).unwrap(), &r);
            assert_eq!(history.current().unwrap(), &r);
        }
    }

    #[test]
    fn test_empty_history() {
        let history = ResponseHistory::new();
        assert!(matches!(history.current(), Err(EngineError::Empty)));
        assert!(matches!(
            history.get(1),
            Err(EngineError::OutOfRange { len: 0, .. })
        ));
    }

    #[test]
    fn test_get_out_of_range() {
        let history = history_of(3);
        assert!(history.get(0).is_err());
        assert!(history.get(4).is_err());
        assert_eq!(history.get(2).unwrap().status, 202);
    }

    #[test]
    fn test_get_relative() {
        let history = history_of(3);
        assert_eq!(history.get_relative(-1).unwrap().status, 203);
        assert_eq!(history.get_relative(-3).unwrap().status, 201);
        assert_eq!(history.get_relative(2).unwrap().status, 202);
        assert!(history.get_relative(-4).is_err());
        assert!(history.get_relative(0).is_err());
    }

    // ── move_to_front ───────────────────────────────────

    #[test]
    fn test_move_to_front_keeps_relative_order() {
        for k in 1..=4 {
            let mut history = history_of(4);
            let moved = history.get(k).unwrap().clone();
            history.move_to_front(k).unwrap();

            assert_eq!(history.len(), 4);
            assert_eq!(history.get(history.len()).unwrap(), &moved);

            let rest: Vec<u16> =
                (1..4).map(|p| history.get(p).unwrap().status).collect();
            let expected: Vec<u16> =
                (1..=4u16).filter(|i| *i as usize != k).map(|i| 200 + i).collect();
            assert_eq!(rest, expected);
        }
    }

    #[test]
    fn test_move_to_front_out_of_range() {
        let mut history = history_of(2);
        assert!(history.move_to_front(3).is_err());
        assert!(history.move_to_front(0).is_err());
        assert_eq!(history.current().unwrap().status, 202);
    }

    // ── extract_element ─────────────────────────────────

    #[test]
    fn test_extract_element() {
        let mut history = ResponseHistory::new();
        history.push(record(200, json!([{"name": "a"}, {"name": "b"}])));
        history.push(record(201, json!({"name": "c"})));

        let before = history.len();
        let element = history.extract_element(1, 2).unwrap();
        assert_eq!(element.body, json!({"name": "b"}));
        assert_eq!(element.status, 200);
        assert_eq!(history.len(), before);
        assert_eq!(history.current().unwrap().status, 201);
    }

    #[test]
    fn test_extract_element_errors() {
        let mut history = ResponseHistory::new();
        history.push(record(200, json!([{"name": "a"}])));
        history.push(record(201, json!({"name": "c"})));

        assert!(matches!(
            history.extract_element(2, 1),
            Err(EngineError::NotAList { position: 2 })
        ));
        assert!(matches!(
            history.extract_element(1, 2),
            Err(EngineError::OutOfRange { what: "element", .. })
        ));
        assert!(matches!(
            history.extract_element(1, 0),
            Err(EngineError::OutOfRange { .. })
        ));
        assert!(history.extract_element(3, 1).is_err());
    }
}
