use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCategory {
    Preference,
    Personal,
    Plan,
    Professional,
    Relationship,
    Misc,
}

impl std::fmt::Display for FactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FactCategory::Preference => "preference",
            FactCategory::Personal => "personal",
            FactCategory::Plan => "plan",
            FactCategory::Professional => "professional",
            FactCategory::Relationship => "relationship",
            FactCategory::Misc => "misc",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FactCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preference" => Ok(Self::Preference),
            "personal" => Ok(Self::Personal),
            "plan" => Ok(Self::Plan),
            "professional" => Ok(Self::Professional),
            "relationship" => Ok(Self::Relationship),
            "misc" => Ok(Self::Misc),
            other => Err(format!("unknown fact category: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonType {
    Observation,
    Failure,
    Success,
    Pattern,
}

impl std::fmt::Display for LessonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LessonType::Observation => "observation",
            LessonType::Failure => "failure",
            LessonType::Success => "success",
            LessonType::Pattern => "pattern",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LessonType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observation" => Ok(Self::Observation),
            "failure" => Ok(Self::Failure),
            "success" => Ok(Self::Success),
            "pattern" => Ok(Self::Pattern),
            other => Err(format!("unknown lesson type: {other}")),
        }
    }
}

/// Stable identity per `(channel, channelUserId)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub display_name: Option<String>,
    pub channel: String,
    pub channel_user_id: String,
    pub relationship_score: f64,
    pub trust_tier_override: Option<String>,
    pub capsule: Option<String>,
    pub public_style_capsule: Option<String>,
    #[serde(default)]
    pub current_concerns: Vec<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub preferences: Vec<String>,
    pub last_mood_signal: Option<String>,
    #[serde(default)]
    pub curiosity_questions: Vec<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub person_id: Option<String>,
    pub subject: String,
    pub content: String,
    pub category: Option<FactCategory>,
    pub evidence_quote: Option<String>,
    pub last_accessed_at_ms: Option<i64>,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub chat_id: String,
    pub person_id: Option<String>,
    pub is_group: Option<bool>,
    pub content: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: Option<LessonType>,
    pub category: Option<String>,
    pub content: String,
    pub rule: Option<String>,
    pub alternative: Option<String>,
    pub person_id: Option<String>,
    #[serde(default)]
    pub episode_refs: Vec<String>,
    pub confidence: Option<f64>,
    pub times_validated: i64,
    pub times_violated: i64,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCapsule {
    pub chat_id: String,
    pub capsule: Option<String>,
    pub updated_at_ms: i64,
}

/// A row from either dirty-claim queue, identified by its generic key column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirtyRow {
    pub key: String,
    pub dirty_at_ms: i64,
    pub dirty_last_at_ms: i64,
    pub claimed_at_ms: Option<i64>,
}

/// One ranked result from `hybrid_search_facts` / `hybrid_search_episodes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit<T> {
    pub item: T,
    pub score: f64,
}

/// Full export payload for `export`/`import` round-tripping (§8).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ExportPayload {
    #[serde(default)]
    pub people: Vec<Person>,
    #[serde(default)]
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub episodes: Vec<Episode>,
    #[serde(default)]
    pub group_capsules: Vec<GroupCapsule>,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
}
