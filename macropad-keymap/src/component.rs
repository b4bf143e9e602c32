//! Physical inputs: keys, encoders and encoder push buttons.

use std::collections::BTreeMap;

/// Kind of a physical input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Button,
    Encoder,
    /// Push button of an encoder; shares the encoder's id.
    EncoderButton,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MatrixPosition {
    pub row: usize,
    pub col: usize,
}

/// Encoder sensing hardware.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncoderHardware {
    /// Incremental encoder read through a hardware pulse counter.
    Quadrature,
    /// AS5600 absolute 12-bit angle sensor on I2C.
    Magnetic,
}

/// Rotation sense applied to raw deltas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    pub fn from_sign(sign: i64) -> Option<Self> {
        match sign {
            1 => Some(Direction::Forward),
            -1 => Some(Direction::Reverse),
            _ => None,
        }
    }

    pub fn sign(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => -1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncoderConfig {
    pub hardware: EncoderHardware,
    pub direction: Direction,
    /// Raw angle treated as zero (magnetic only).
    pub zero_position: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Component {
    pub id: String,
    pub kind: ComponentKind,
    /// Matrix cell for buttons and encoder push buttons.
    pub position: Option<MatrixPosition>,
    /// Footprint in grid units (rows, columns), used by layout renderers.
    pub size: (usize, usize),
    pub encoder: Option<EncoderConfig>,
}

impl Component {
    /// Encoders with a push button keep a matrix position.
    pub fn has_button(&self) -> bool {
        self.kind == ComponentKind::Encoder && self.position.is_some()
    }
}

/// A matrix cell that carries a component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatrixCell {
    pub position: MatrixPosition,
    pub component_id: String,
    pub kind: ComponentKind,
}

/// All components of a board, keyed by id.
#[derive(Clone, Debug, Default)]
pub struct ComponentSet {
    components: BTreeMap<String, Component>,
}

impl ComponentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a component, returning it back if the id is already taken.
    pub fn insert(&mut self, component: Component) -> Result<(), Component> {
        if self.components.contains_key(&component.id) {
            return Err(component);
        }
        self.components.insert(component.id.clone(), component);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Component> {
        self.components.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.components.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    pub fn encoders(&self) -> impl Iterator<Item = &Component> {
        self.components
            .values()
            .filter(|c| c.kind == ComponentKind::Encoder)
    }

    /// Matrix cells carrying a component, ordered by position. When two
    /// components claim the same cell the first in id order wins.
    pub fn matrix_cells(&self) -> Vec<MatrixCell> {
        let mut cells: BTreeMap<MatrixPosition, MatrixCell> = BTreeMap::new();
        for component in self.components.values() {
            let Some(position) = component.position else {
                continue;
            };
            let kind = match component.kind {
                ComponentKind::Encoder => ComponentKind::EncoderButton,
                other => other,
            };
            cells.entry(position).or_insert_with(|| MatrixCell {
                position,
                component_id: component.id.clone(),
                kind,
            });
        }
        cells.into_values().collect()
    }

    /// Smallest (rows, cols) grid that holds every matrix cell.
    pub fn matrix_dimensions(&self) -> (usize, usize) {
        self.components
            .values()
            .filter_map(|c| c.position)
            .fold((0, 0), |(rows, cols), p| {
                (rows.max(p.row + 1), cols.max(p.col + 1))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn button(id: &str, row: usize, col: usize) -> Component {
        Component {
            id: id.to_string(),
            kind: ComponentKind::Button,
            position: Some(MatrixPosition { row, col }),
            size: (1, 1),
            encoder: None,
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut set = ComponentSet::new();
        assert!(set.insert(button("button-1", 0, 0)).is_ok());
        assert!(set.insert(button("button-1", 0, 1)).is_err());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn cells_include_encoder_buttons_and_skip_conflicts() {
        let mut set = ComponentSet::new();
        set.insert(button("button-1", 0, 0)).unwrap();
        set.insert(button("button-2", 0, 0)).unwrap();
        set.insert(Component {
            id: "encoder-1".into(),
            kind: ComponentKind::Encoder,
            position: Some(MatrixPosition { row: 1, col: 2 }),
            size: (1, 1),
            encoder: Some(EncoderConfig {
                hardware: EncoderHardware::Magnetic,
                direction: Direction::Forward,
                zero_position: 0,
            }),
        })
        .unwrap();

        let cells = set.matrix_cells();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].component_id, "button-1");
        assert_eq!(cells[1].kind, ComponentKind::EncoderButton);
        assert_eq!(set.matrix_dimensions(), (2, 3));
        assert!(set.get("encoder-1").unwrap().has_button());
    }

    #[test]
    fn direction_sign() {
        assert_eq!(Direction::from_sign(-1), Some(Direction::Reverse));
        assert_eq!(Direction::from_sign(2), None);
        assert_eq!(Direction::Reverse.sign(), -1);
    }
}
