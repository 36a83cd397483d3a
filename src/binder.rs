use crate::error::AppResult;
use crate::store::{compare_values, Document, DocumentStore, Query, SubscriptionId};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Several live queries folded into one list.
///
/// Each binder owns one partition (its source id, e.g. a class id). An update
/// replaces only that partition, so the merged list does not depend on the order
/// in which binders fire.
#[derive(Debug, Default)]
pub struct MergedView {
    partitions: BTreeMap<String, Vec<Document>>,
    sort_field: Option<String>,
}

impl MergedView {
    pub fn new(sort_field: Option<String>) -> Self {
        Self {
            partitions: BTreeMap::new(),
            sort_field,
        }
    }

    pub fn apply(&mut self, partition: &str, docs: &[Document]) {
        self.partitions.insert(partition.to_string(), docs.to_vec());
    }

    pub fn items(&self) -> Vec<Document> {
        let mut out: Vec<Document> = self.partitions.values().flatten().cloned().collect();
        if let Some(field) = &self.sort_field {
            out.sort_by(|a, b| {
                compare_values(a.get(field), b.get(field)).then_with(|| a.path.cmp(&b.path))
            });
        }
        out
    }
}

/// A set of binders feeding one [`MergedView`]; closing it releases every listener.
pub struct LiveView {
    view: Rc<RefCell<MergedView>>,
    subscriptions: Vec<SubscriptionId>,
}

impl LiveView {
    /// Binds one query per partition. `on_change` sees the merged list after
    /// every partition update, starting with the initial result sets.
    pub fn open<F>(
        store: &mut DocumentStore,
        partitions: Vec<(String, Query)>,
        sort_field: Option<String>,
        on_change: F,
    ) -> AppResult<Self>
    where
        F: Fn(&[Document]) + 'static,
    {
        let view = Rc::new(RefCell::new(MergedView::new(sort_field)));
        let on_change = Rc::new(on_change);
        let mut subscriptions = Vec::with_capacity(partitions.len());
        for (partition, query) in partitions {
            let view = view.clone();
            let on_change = on_change.clone();
            let bound = store.subscribe(query, move |_, docs| {
                let items = {
                    let mut v = view.borrow_mut();
                    v.apply(&partition, docs);
                    v.items()
                };
                on_change(items.as_slice());
            });
            match bound {
                Ok(id) => subscriptions.push(id),
                Err(e) => {
                    for id in subscriptions {
                        store.unsubscribe(id);
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self {
            view,
            subscriptions,
        })
    }

    pub fn items(&self) -> Vec<Document> {
        self.view.borrow().items()
    }

    pub fn close(self, store: &mut DocumentStore) {
        for id in self.subscriptions {
            store.unsubscribe(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::store::fields;
    use serde_json::json;

    fn doc(path: &str, due: &str) -> Document {
        Document {
            id: path.rsplit('/').next().unwrap_or_default().to_string(),
            path: path.to_string(),
            data: json!({ "dueDate": due }),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn paths(docs: &[Document]) -> Vec<String> {
        docs.iter().map(|d| d.path.clone()).collect()
    }

    #[test]
    fn merge_is_independent_of_update_order() {
        let a = vec![doc("classes/a/assignments/1", "2024-05-01")];
        let b = vec![doc("classes/b/assignments/2", "2024-04-01")];
        let a2 = vec![
            doc("classes/a/assignments/1", "2024-05-01"),
            doc("classes/a/assignments/3", "2024-03-01"),
        ];

        let mut x = MergedView::new(Some("dueDate".into()));
        x.apply("a", &a);
        x.apply("b", &b);
        x.apply("a", &a2);

        let mut y = MergedView::new(Some("dueDate".into()));
        y.apply("a", &a2);
        y.apply("b", &b);
        y.apply("b", &b);

        assert_eq!(paths(&x.items()), paths(&y.items()));
        assert_eq!(
            paths(&x.items()),
            vec![
                "classes/a/assignments/3",
                "classes/b/assignments/2",
                "classes/a/assignments/1"
            ]
        );
    }

    #[test]
    fn an_update_never_touches_other_partitions() {
        let mut v = MergedView::new(None);
        v.apply("a", &[doc("classes/a/assignments/1", "x")]);
        v.apply("b", &[doc("classes/b/assignments/2", "y")]);
        v.apply("a", &[]);
        assert_eq!(paths(&v.items()), vec!["classes/b/assignments/2"]);
    }

    #[test]
    fn closed_view_stops_receiving_updates() {
        let mut store = DocumentStore::new(db::open_memory());
        let seen = Rc::new(RefCell::new(Vec::<usize>::new()));
        let sink = seen.clone();
        let view = LiveView::open(
            &mut store,
            vec![
                ("a".into(), Query::new("classes/a/assignments")),
                ("b".into(), Query::new("classes/b/assignments")),
            ],
            None,
            move |items| sink.borrow_mut().push(items.len()),
        )
        .expect("open");
        store
            .set("classes/a/assignments/1", fields(json!({ "title": "x" })))
            .expect("write a");
        store
            .set("classes/b/assignments/2", fields(json!({ "title": "y" })))
            .expect("write b");
        assert_eq!(view.items().len(), 2);
        assert_eq!(*seen.borrow(), vec![0, 0, 1, 2]);

        view.close(&mut store);
        store
            .set("classes/a/assignments/3", fields(json!({ "title": "z" })))
            .expect("write after close");
        assert_eq!(*seen.borrow(), vec![0, 0, 1, 2]);
        assert_eq!(store.subscription_count(), 0);
    }
}
