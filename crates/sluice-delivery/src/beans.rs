//! Bean context: values produced during a pass, addressed by [`BeanId`].

use std::collections::HashMap;

use serde_json::Value;
use sluice_types::BeanId;
use sluice_xml::NodeKey;

/// A bean value and the fragment that produced it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Bean {
    pub value: Value,
    pub fragment: Option<NodeKey>,
}

/// Beans of one pass. Shared between an outer pass and its nested passes.
#[derive(Debug, Default)]
pub struct BeanContext {
    beans: HashMap<BeanId, Bean>,
}

impl BeanContext {
    pub fn add_bean(&mut self, id: BeanId, value: Value, fragment: Option<NodeKey>) {
        tracing::trace!(bean = %id, "Bean added");
        self.beans.insert(id, Bean { value, fragment });
    }

    pub fn bean(&self, id: &BeanId) -> Option<&Bean> {
        self.beans.get(id)
    }

    pub fn get_bean(&self, id: &BeanId) -> Option<&Value> {
        self.beans.get(id).map(|b| &b.value)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.beans
            .iter()
            .find(|(id, _)| id.name == name)
            .map(|(_, b)| &b.value)
    }

    pub fn remove_bean(&mut self, id: &BeanId) -> Option<Bean> {
        self.beans.remove(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &BeanId> {
        self.beans.keys()
    }

    pub fn len(&self) -> usize {
        self.beans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_lookup_and_remove() {
        let id = BeanId {
            name: "order".into(),
            index: 0,
        };
        let mut beans = BeanContext::default();
        beans.add_bean(id.clone(), json!({"total": 3}), None);
        assert_eq!(beans.get_bean(&id), Some(&json!({"total": 3})));
        assert_eq!(beans.get_by_name("order"), Some(&json!({"total": 3})));
        assert!(beans.get_by_name("other").is_none());
        beans.add_bean(id.clone(), json!("replaced"), None);
        assert_eq!(beans.len(), 1);
        assert_eq!(beans.remove_bean(&id).map(|b| b.value), Some(json!("replaced")));
        assert!(beans.is_empty());
    }
}
