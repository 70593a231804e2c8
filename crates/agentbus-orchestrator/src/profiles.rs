use serde::{Deserialize, Serialize};

/// Description of one specialized agent as the orchestrator sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_id: String,
    #[serde(default)]
    pub description: String,
    /// Capability tags advertised when the agent registers with the broker.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Words or phrases that make a request relevant to this agent. Matched
    /// case-insensitively on whole words; punctuation is ignored.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl AgentProfile {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            description: String::new(),
            capabilities: Vec::new(),
            keywords: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

/// The stock fitness coaching line-up.
pub fn default_profiles() -> Vec<AgentProfile> {
    vec![
        nutrition_profile(),
        training_profile(),
        biometrics_profile(),
        recovery_profile(),
        general_profile(),
    ]
}

fn nutrition_profile() -> AgentProfile {
    AgentProfile::new("nutrition")
        .with_description("Meal planning, macros and supplementation")
        .with_capabilities(["nutrition", "meal_planning", "supplements"])
        .with_keywords([
            "eat", "diet", "meal", "food", "protein", "carbs", "carbohydrate", "fat", "calorie",
            "calories", "macro", "macros", "nutrition", "supplement", "creatine", "hydration",
            "breakfast", "lunch", "dinner", "snack",
        ])
}

fn training_profile() -> AgentProfile {
    AgentProfile::new("training")
        .with_description("Workout programming and exercise technique")
        .with_capabilities(["training", "workout_planning", "exercise_technique"])
        .with_keywords([
            "workout", "training", "exercise", "squat", "deadlift", "bench", "press", "sets",
            "reps", "program", "routine", "strength", "hypertrophy", "cardio", "run", "running",
            "lift", "lifting", "mobility",
        ])
}

fn biometrics_profile() -> AgentProfile {
    AgentProfile::new("biometrics")
        .with_description("Wearable data, heart rate and body composition")
        .with_capabilities(["biometrics", "wearables", "body_composition"])
        .with_keywords([
            "heart rate", "hrv", "resting", "vo2", "vo2max", "weight", "body fat", "bmi",
            "steps", "wearable", "watch", "biometrics", "blood pressure", "glucose",
        ])
}

fn recovery_profile() -> AgentProfile {
    AgentProfile::new("recovery")
        .with_description("Sleep, rest days and injury management")
        .with_capabilities(["recovery", "sleep", "injury_prevention"])
        .with_keywords([
            "sleep", "rest", "recovery", "recover", "sore", "soreness", "injury", "pain",
            "stretch", "stretching", "fatigue", "tired", "overtraining", "deload",
        ])
}

fn general_profile() -> AgentProfile {
    AgentProfile::new("general")
        .with_description("General fitness questions nothing else covers")
        .with_capabilities(["general"])
}
