//! Field specification table: the closed-world contract for every state
//! field a patch may touch.
//!
//! A [`Schema`] is built once from a list of [`FieldSpec`]s and never
//! changes afterwards. Lookups of names it does not contain are how the
//! validator rejects unknown fields.

use crate::error::SchemaError;
use crate::validation;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declared shape of a field, checked against the runtime [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    String,
    Boolean,
    Integer,
    Floating,
    List,
    Map,
}

impl SemanticType {
    pub fn is_numeric(self) -> bool {
        matches!(self, SemanticType::Integer | SemanticType::Floating)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SemanticType::String => "string",
            SemanticType::Boolean => "boolean",
            SemanticType::Integer => "integer",
            SemanticType::Floating => "floating",
            SemanticType::List => "list",
            SemanticType::Map => "map",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation contract for one named field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub semantic_type: SemanticType,
    pub required: bool,
    pub nullable: bool,
    /// Substituted for a null input when the field is neither required nor
    /// nullable.
    pub default_value: Value,
    pub allowed_values: Option<Vec<Value>>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub description: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            required: false,
            nullable: false,
            default_value: Value::Null,
            allowed_values: None,
            min: None,
            max: None,
            description: String::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = value.into();
        self
    }

    pub fn allowed<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn range(self, min: f64, max: f64) -> Self {
        self.min(min).max(max)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn check(&self) -> Result<(), SchemaError> {
        if self.name.is_empty() {
            return Err(SchemaError::EmptyName);
        }

        if !self.semantic_type.is_numeric() && (self.min.is_some() || self.max.is_some()) {
            return Err(SchemaError::BoundsOnNonNumeric {
                field: self.name.clone(),
                semantic_type: self.semantic_type,
            });
        }

        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(SchemaError::InvertedRange {
                    field: self.name.clone(),
                    min,
                    max,
                });
            }
        }

        if self
            .allowed_values
            .as_ref()
            .is_some_and(|allowed| allowed.is_empty())
        {
            return Err(SchemaError::EmptyAllowedValues(self.name.clone()));
        }

        // A null for this field would otherwise reach the sink as null.
        if !self.required && !self.nullable && self.default_value.is_null() {
            return Err(SchemaError::MissingDefault(self.name.clone()));
        }

        if !self.default_value.is_null() {
            validation::validate_field(self, &self.default_value).map_err(|err| {
                SchemaError::InvalidDefault {
                    field: self.name.clone(),
                    source: Box::new(err),
                }
            })?;
        }

        Ok(())
    }
}

/// Immutable table of field specifications keyed by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    fields: BTreeMap<String, FieldSpec>,
}

impl Schema {
    pub fn from_fields(specs: impl IntoIterator<Item = FieldSpec>) -> Result<Self, SchemaError> {
        let mut fields = BTreeMap::new();

        for spec in specs {
            spec.check()?;
            if fields.contains_key(&spec.name) {
                return Err(SchemaError::DuplicateField(spec.name));
            }
            fields.insert(spec.name.clone(), spec);
        }

        Ok(Self { fields })
    }

    pub fn lookup(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// All declared names, sorted.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

const GAME_TYPES: [&str; 3] = ["recall", "cleco", "dutch"];

const GAME_STATUSES: [&str; 4] = ["inactive", "active", "paused", "ended"];

const GAME_PHASES: [&str; 11] = [
    "waiting",
    "setup",
    "playing",
    "same_rank_window",
    "special_play_window",
    "queen_peek_window",
    "turn_pending_events",
    "ending_round",
    "ending_turn",
    "recall_called",
    "game_ended",
];

const PLAYER_STATUSES: [&str; 13] = [
    "waiting",
    "ready",
    "playing",
    "drawing_card",
    "playing_card",
    "same_rank_window",
    "queen_peek",
    "jack_swap",
    "peeking",
    "initial_peek",
    "finished",
    "disconnected",
    "winner",
];

/// The table every card-game client session validates against.
pub fn game_state_schema() -> Result<Schema, SchemaError> {
    use SemanticType::*;

    Schema::from_fields([
        // Session identity.
        FieldSpec::new("userId", String)
            .nullable()
            .describe("Authenticated user id"),
        FieldSpec::new("isLoggedIn", Boolean)
            .default_value(false)
            .describe("Whether the client holds a session"),
        FieldSpec::new("currentGameId", String)
            .nullable()
            .describe("Game the client is seated in"),
        FieldSpec::new("currentRoomId", String)
            .nullable()
            .describe("Room the client has joined"),
        FieldSpec::new("gameType", String)
            .allowed(GAME_TYPES)
            .default_value("recall")
            .describe("Rule set of the current game"),
        // Game lifecycle.
        FieldSpec::new("gamePhase", String)
            .allowed(GAME_PHASES)
            .default_value("waiting")
            .describe("Server-reported phase of the current game"),
        FieldSpec::new("gameStatus", String)
            .allowed(GAME_STATUSES)
            .default_value("inactive")
            .describe("Lifecycle status of the current game"),
        FieldSpec::new("isGameActive", Boolean).default_value(false),
        FieldSpec::new("roundNumber", Integer)
            .min(0.0)
            .default_value(0)
            .describe("Round counter, zero before the first deal"),
        FieldSpec::new("turnNumber", Integer)
            .min(0.0)
            .default_value(0)
            .describe("Turn counter within the round"),
        FieldSpec::new("playerCount", Integer)
            .range(0.0, 12.0)
            .default_value(0),
        FieldSpec::new("minPlayers", Integer)
            .range(2.0, 12.0)
            .default_value(2),
        FieldSpec::new("maxPlayers", Integer)
            .range(2.0, 12.0)
            .default_value(4),
        FieldSpec::new("turnTimeoutSeconds", Integer)
            .min(0.0)
            .default_value(30),
        FieldSpec::new("timerProgress", Floating)
            .range(0.0, 1.0)
            .default_value(0.0)
            .describe("Fraction of the turn timer already spent"),
        // Player view.
        FieldSpec::new("playerStatus", String)
            .allowed(PLAYER_STATUSES)
            .default_value("waiting"),
        FieldSpec::new("isMyTurn", Boolean).default_value(false),
        FieldSpec::new("myHandCards", List)
            .default_value(Value::List(Vec::new()))
            .describe("Cards in the local player's hand"),
        FieldSpec::new("myDrawnCard", Map)
            .nullable()
            .describe("Card drawn this turn, if any"),
        FieldSpec::new("myScore", Integer).default_value(0),
        FieldSpec::new("currentPlayer", Map)
            .nullable()
            .describe("Player whose turn it is"),
        FieldSpec::new("opponentPlayers", List).default_value(Value::List(Vec::new())),
        // Table.
        FieldSpec::new("discardPile", List).default_value(Value::List(Vec::new())),
        FieldSpec::new("drawPileCount", Integer)
            .min(0.0)
            .default_value(0),
        FieldSpec::new("recallCalledBy", String)
            .nullable()
            .describe("Player id that called the final round"),
        FieldSpec::new("winners", List).default_value(Value::List(Vec::new())),
        // Bookkeeping.
        FieldSpec::new("games", Map)
            .default_value(Value::Map(BTreeMap::new()))
            .describe("Per-game cached state keyed by game id"),
        FieldSpec::new("actionError", Map)
            .nullable()
            .describe("Last action error reported by the server"),
        FieldSpec::new("lastUpdated", String).nullable(),
    ])
}
