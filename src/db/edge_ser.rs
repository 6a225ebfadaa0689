use crate::db::transaction::TxData;
use crate::error::{GraphError, Result};
use crate::model::{Direction, Relation, RelationBody, RelationId, TypeId};
use crate::schema::VERTEX_EXISTS_TYPE;
use crate::storage::ser::{self, Cursor};
use crate::storage::{Entry, SliceQuery};

const DIR_OUT: u8 = 0;
const DIR_IN: u8 = 1;

/// Encodes relations into adjacency entries.
///
/// Columns are ordered byte strings: an 8-byte big-endian type (or
/// relation-index view) id, one direction byte, then the big-endian
/// relation id. Every field is order-preserving, so a `(type, direction)`
/// slice is a contiguous column range within a vertex's adjacency and a
/// relation-id interval narrows it further.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeSerializer;

impl EdgeSerializer {
    /// Serializes `relation` as seen from position `pos` under its base
    /// type.
    pub fn write_relation(&self, relation: &Relation, pos: usize, data: &TxData) -> Result<Entry> {
        self.write_relation_as(relation, relation.type_id, pos, data)
    }

    /// Serializes `relation` under an alternate relation-index view id.
    pub fn write_relation_as(
        &self,
        relation: &Relation,
        view_id: TypeId,
        pos: usize,
        data: &TxData,
    ) -> Result<Entry> {
        let mut column = Vec::with_capacity(17);
        ser::write_u64(&mut column, view_id);
        column.push(match Direction::from_position(pos) {
            Direction::Out => DIR_OUT,
            Direction::In => DIR_IN,
            Direction::Both => unreachable!("positions map to OUT or IN"),
        });
        if !relation.has_id() {
            return Err(GraphError::IllegalState(
                "relation has no id assigned".into(),
            ));
        }
        ser::write_u64(&mut column, relation.id);

        let mut value = Vec::new();
        match &relation.body {
            RelationBody::Property {
                value: property, ..
            } => {
                ser::write_property_value(&mut value, property);
            }
            RelationBody::Edge { payload, .. } => {
                let other = data.vertex(relation.vertex_slot(1 - pos));
                if !other.has_id() {
                    return Err(GraphError::IllegalState(
                        "edge endpoint has no id assigned".into(),
                    ));
                }
                ser::write_varlong(&mut value, other.id);
                ser::write_bool(&mut value, payload.is_some());
                if let Some(payload) = payload {
                    ser::write_property_value(&mut value, payload);
                }
            }
        }
        Ok(Entry::new(column, value))
    }

    /// Contiguous column range holding every entry of `(type, direction)`.
    pub fn slice_query(&self, type_id: TypeId, direction: Direction) -> SliceQuery {
        let mut start = Vec::with_capacity(9);
        ser::write_u64(&mut start, type_id);
        let mut end = start.clone();
        match direction {
            Direction::Out => {
                start.push(DIR_OUT);
                end.push(DIR_OUT + 1);
            }
            Direction::In => {
                start.push(DIR_IN);
                end.push(DIR_IN + 1);
            }
            Direction::Both => {
                start.push(DIR_OUT);
                end.push(DIR_IN + 1);
            }
        }
        SliceQuery::new(start, end)
    }

    /// Slice over `(type, direction)` narrowed to relation ids in
    /// `[id_start, id_end)`. Only meaningful for a concrete direction.
    pub fn slice_query_interval(
        &self,
        type_id: TypeId,
        direction: Direction,
        id_start: RelationId,
        id_end: RelationId,
    ) -> Result<SliceQuery> {
        if direction == Direction::Both {
            return Err(GraphError::InvalidArgument(
                "interval queries require a concrete direction".into(),
            ));
        }
        if id_start > id_end {
            return Err(GraphError::InvalidArgument(
                "relation id interval is inverted".into(),
            ));
        }
        let dir_byte = if direction == Direction::Out { DIR_OUT } else { DIR_IN };
        let mut start = Vec::with_capacity(17);
        ser::write_u64(&mut start, type_id);
        start.push(dir_byte);
        let mut end = start.clone();
        ser::write_u64(&mut start, id_start);
        ser::write_u64(&mut end, id_end);
        Ok(SliceQuery::new(start, end))
    }

    /// Singleton slice matching exactly one existence entry per vertex;
    /// global scans use it to tell vertex keys from other keys.
    pub fn vertex_existence_query(&self) -> SliceQuery {
        self.slice_query(VERTEX_EXISTS_TYPE, Direction::Out)
            .with_limit(1)
    }

    /// Inverts the column prefix written by [`write_relation_as`].
    pub fn read_column_prefix(&self, column: &[u8]) -> Result<(TypeId, Direction, RelationId)> {
        let mut cursor = Cursor::new(column);
        let type_id = cursor.read_u64()?;
        let direction = match cursor.read_u8()? {
            DIR_OUT => Direction::Out,
            DIR_IN => Direction::In,
            other => {
                return Err(GraphError::Corruption(format!(
                    "invalid direction byte in column: {other}"
                )))
            }
        };
        let relation_id = cursor.read_u64()?;
        Ok((type_id, direction, relation_id))
    }
}
