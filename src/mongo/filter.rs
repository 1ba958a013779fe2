// Simplified filter translation for the document store
// A RecordFilter maps field names to typed predicates and renders them into the
// native query-predicate document the driver understands.

use mongodb::bson::{doc, Bson, Document};

/// One predicate on a single field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldPredicate {
    /// Scalar equality
    Equals(Bson),
    /// Membership test
    OneOf(Vec<Bson>),
    /// Inclusive range
    Between(Bson, Bson),
    /// Native operator document, passed through untouched (e.g. `{"$gt": 50}`)
    Raw(Document),
}

/// Simplified filter specification: field name -> predicate.
///
/// Clauses on distinct fields combine conjunctively, like a WHERE clause.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    clauses: Vec<(String, FieldPredicate)>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.clauses
            .push((field.to_string(), FieldPredicate::Equals(value.into())));
        self
    }

    pub fn one_of<I, V>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.clauses
            .push((field.to_string(), FieldPredicate::OneOf(values)));
        self
    }

    pub fn between(mut self, field: &str, low: impl Into<Bson>, high: impl Into<Bson>) -> Self {
        self.clauses.push((
            field.to_string(),
            FieldPredicate::Between(low.into(), high.into()),
        ));
        self
    }

    pub fn raw(mut self, field: &str, predicate: Document) -> Self {
        self.clauses
            .push((field.to_string(), FieldPredicate::Raw(predicate)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Render into the driver's native predicate document.
    pub fn to_document(&self) -> Document {
        let mut out = Document::new();
        for (field, predicate) in &self.clauses {
            let value: Bson = match predicate {
                FieldPredicate::Equals(v) => v.clone(),
                FieldPredicate::OneOf(values) => doc! { "$in": values.clone() }.into(),
                FieldPredicate::Between(low, high) => {
                    doc! { "$gte": low.clone(), "$lte": high.clone() }.into()
                }
                FieldPredicate::Raw(d) => d.clone().into(),
            };
            out.insert(field.clone(), value);
        }
        out
    }
}
