use serde::{Deserialize, Serialize};

/// A generated coding problem. Fixed for the rest of the session once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemStatement {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "input", default)]
    pub input_spec: String,
    #[serde(rename = "output", default)]
    pub output_spec: String,
}

impl ProblemStatement {
    /// Text the interviewer reads out when the problem is presented.
    pub fn read_aloud(&self) -> String {
        format!(
            "Here is your coding problem. {}. {}. Input: {}. Output: {}",
            self.title, self.description, self.input_spec, self.output_spec
        )
    }
}

/// Learning-mode material: a problem together with a worked solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningMaterial {
    pub problem: ProblemStatement,
    pub solution: String,
    pub explanation: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_aloud_includes_every_part() {
        let problem = ProblemStatement {
            title: "Two Sum".into(),
            description: "Find two numbers that add up to a target".into(),
            input_spec: "nums, target".into(),
            output_spec: "indices".into(),
        };
        assert_eq!(
            problem.read_aloud(),
            "Here is your coding problem. Two Sum. Find two numbers that add up to a target. Input: nums, target. Output: indices"
        );
    }

    #[test]
    fn input_and_output_are_optional_on_the_wire() {
        let problem: ProblemStatement =
            serde_json::from_str(r#"{"title":"Reverse","description":"Reverse a list"}"#).unwrap();
        assert_eq!(problem.input_spec, "");
        assert_eq!(problem.output_spec, "");
    }
}
