//! Merger scenarios for the simulation harness.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Two objects cross paths and merge while passing
    Crossing,

    /// Three objects travel side by side, drifting in and out of contact
    Convoy,

    /// Many objects with random motion in a small volume
    Swarm,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![ScenarioId::Crossing, ScenarioId::Convoy, ScenarioId::Swarm]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Crossing => "crossing",
            ScenarioId::Convoy => "convoy",
            ScenarioId::Swarm => "swarm",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Crossing => "2 objects on opposite courses, merged while they pass",
            ScenarioId::Convoy => "3 parallel objects with converging and diverging lanes",
            ScenarioId::Swarm => "12 objects with random velocities in a shared volume",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "crossing" => Ok(ScenarioId::Crossing),
            "convoy" => Ok(ScenarioId::Convoy),
            "swarm" => Ok(ScenarioId::Swarm),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert!("stampede".parse::<ScenarioId>().is_err());
    }
}
