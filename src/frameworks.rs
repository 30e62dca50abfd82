//! Catalog of prompt enhancement frameworks.
//!
//! Each framework is a fixed prompting strategy realised as a system prompt sent
//! ahead of the user's text. The catalog is immutable and built into the binary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Builds a framework system prompt from its strategy name, process and goal.
macro_rules! system_prompt {
    ($strategy:literal, $process:literal, $goal:literal) => {
        concat!(
            "You are an AI prompt enhancement specialist using the ",
            $strategy,
            ".\nProcess: ",
            $process,
            "\n<HARD_RULE> Return only the final enhanced prompt, without any additional text, steps, reasoning, explanation or evaluation, so the user can use it directly. </HARD_RULE>\n",
            "Return only the final enhanced prompt ",
            $goal,
            "."
        )
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameworkId {
    Cot,
    React,
    Tot,
    SelfConsistency,
    Pal,
    FewShot,
    Risen,
    Trace,
    Coast,
    Reflexion,
    Ape,
    MetaPrompting,
    Socratic,
    StepBack,
    Pain,
}

impl FrameworkId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cot => "cot",
            Self::React => "react",
            Self::Tot => "tot",
            Self::SelfConsistency => "self_consistency",
            Self::Pal => "pal",
            Self::FewShot => "few_shot",
            Self::Risen => "risen",
            Self::Trace => "trace",
            Self::Coast => "coast",
            Self::Reflexion => "reflexion",
            Self::Ape => "ape",
            Self::MetaPrompting => "meta_prompting",
            Self::Socratic => "socratic",
            Self::StepBack => "step_back",
            Self::Pain => "pain",
        }
    }
}

impl fmt::Display for FrameworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameworkId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CATALOG
            .iter()
            .map(|spec| spec.id)
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("Unknown framework: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameworkCategory {
    Reasoning,
    Pattern,
    Refinement,
    Analysis,
}

/// What a provider output must contain to count as a usable enhancement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputContract {
    pub enhanced_prompt: bool,
}

const ENHANCED_PROMPT_ONLY: OutputContract = OutputContract {
    enhanced_prompt: true,
};

impl OutputContract {
    pub fn accepts(&self, enhanced_prompt: &str) -> bool {
        !self.enhanced_prompt || !enhanced_prompt.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameworkSpec {
    pub id: FrameworkId,
    pub name: &'static str,
    pub description: &'static str,
    pub category: FrameworkCategory,
    pub system_prompt: &'static str,
    pub output_contract: OutputContract,
}

/// Display row returned by [`FrameworkCatalog::list_frameworks`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameworkSummary {
    pub id: FrameworkId,
    pub name: &'static str,
    pub description: &'static str,
    pub category: FrameworkCategory,
}

/// Framework used when neither the request nor the settings name one.
pub const DEFAULT_FRAMEWORK: FrameworkId = FrameworkId::Cot;

static CATALOG: &[FrameworkSpec] = &[
    FrameworkSpec {
        id: FrameworkId::Cot,
        name: "Chain-of-Thought",
        description: "Best for multi-step reasoning. Breaks the task into explicit intermediate steps.",
        category: FrameworkCategory::Reasoning,
        system_prompt: system_prompt!(
            "Chain-of-Thought framework",
            "Break the task into logical steps, reason through each step in order, connect the steps into a coherent solution path.",
            "incorporating this step-by-step reasoning"
        ),
        output_contract: ENHANCED_PROMPT_ONLY,
    },
    FrameworkSpec {
        id: FrameworkId::React,
        name: "ReAct",
        description: "Best for interactive problem-solving. Combines reasoning with tool/action use.",
        category: FrameworkCategory::Reasoning,
        system_prompt: system_prompt!(
            "ReAct framework",
            "Reason about the task, Act on the reasoning, Observe results, Repeat if needed.",
            "incorporating this reasoning cycle"
        ),
        output_contract: ENHANCED_PROMPT_ONLY,
    },
    FrameworkSpec {
        id: FrameworkId::Tot,
        name: "Tree-of-Thoughts",
        description: "Best for creativity/accuracy. Generates diverse reasoning paths for open-ended tasks.",
        category: FrameworkCategory::Reasoning,
        system_prompt: system_prompt!(
            "Tree-of-Thoughts framework",
            "Explore multiple solution paths, evaluate each path's potential, select the most promising approach.",
            "incorporating the best reasoning path"
        ),
        output_contract: ENHANCED_PROMPT_ONLY,
    },
    FrameworkSpec {
        id: FrameworkId::SelfConsistency,
        name: "Self-Consistency",
        description: "Best for accuracy. Improves reliability by aggregating multiple reasoning paths.",
        category: FrameworkCategory::Reasoning,
        system_prompt: system_prompt!(
            "Self-Consistency framework",
            "Generate multiple Chain-of-Thought paths, identify consensus patterns, create a unified approach.",
            "incorporating the consensus reasoning"
        ),
        output_contract: ENHANCED_PROMPT_ONLY,
    },
    FrameworkSpec {
        id: FrameworkId::Pal,
        name: "Program-Aided Language",
        description: "Best for math/algorithmic tasks. Uses code to structure reasoning.",
        category: FrameworkCategory::Reasoning,
        system_prompt: system_prompt!(
            "Program-Aided Language framework",
            "Frame the problem programmatically, break it down into algorithmic steps, explain the logic clearly.",
            "incorporating the programmatic approach"
        ),
        output_contract: ENHANCED_PROMPT_ONLY,
    },
    FrameworkSpec {
        id: FrameworkId::FewShot,
        name: "Few-Shot Prompting",
        description: "Best for pattern imitation. Uses examples to guide output format.",
        category: FrameworkCategory::Pattern,
        system_prompt: system_prompt!(
            "Few-Shot framework",
            "Analyze example patterns, identify key elements, apply the pattern to the new input.",
            "incorporating the learned pattern"
        ),
        output_contract: ENHANCED_PROMPT_ONLY,
    },
    FrameworkSpec {
        id: FrameworkId::Risen,
        name: "RISEN Framework",
        description: "Best for structured outputs. Ensures consistency via role, scenario, and examples.",
        category: FrameworkCategory::Pattern,
        system_prompt: system_prompt!(
            "RISEN framework (Role, Instructions, Scenario, Examples, Notes)",
            "Define role context, provide clear instructions, set the scenario, include examples, add clarifying notes.",
            "incorporating all RISEN elements"
        ),
        output_contract: ENHANCED_PROMPT_ONLY,
    },
    FrameworkSpec {
        id: FrameworkId::Trace,
        name: "TRACE Framework",
        description: "Best for clarity in complex tasks. Defines scope, role, and expectations.",
        category: FrameworkCategory::Pattern,
        system_prompt: system_prompt!(
            "TRACE framework (Topic, Role, Action, Context, Expectation)",
            "Define topic scope, establish role, specify actions, provide context, set clear expectations.",
            "incorporating all TRACE elements"
        ),
        output_contract: ENHANCED_PROMPT_ONLY,
    },
    FrameworkSpec {
        id: FrameworkId::Coast,
        name: "COAST Framework",
        description: "Best for business/creative tasks. Aligns outputs with context, goals, and stakeholders.",
        category: FrameworkCategory::Pattern,
        system_prompt: system_prompt!(
            "COAST framework (Context, Objective, Action, Stakeholders, Tone)",
            "Set context, define objectives, specify actions, identify stakeholders, establish tone.",
            "incorporating all COAST elements"
        ),
        output_contract: ENHANCED_PROMPT_ONLY,
    },
    FrameworkSpec {
        id: FrameworkId::Reflexion,
        name: "Reflexion",
        description: "Best for iterative refinement. Encourages self-critique and improvement.",
        category: FrameworkCategory::Refinement,
        system_prompt: system_prompt!(
            "Reflexion framework",
            "Generate an initial response, perform self-critique, create an improved version.",
            "incorporating the improvements"
        ),
        output_contract: ENHANCED_PROMPT_ONLY,
    },
    FrameworkSpec {
        id: FrameworkId::Ape,
        name: "APE Framework",
        description: "Best for iterative refinement. Generates an answer, prompts for feedback, and improves.",
        category: FrameworkCategory::Refinement,
        system_prompt: system_prompt!(
            "APE framework (Answer, Prompt, Evaluate)",
            "Generate an initial answer, create refining prompts, evaluate and improve.",
            "from this iterative process"
        ),
        output_contract: ENHANCED_PROMPT_ONLY,
    },
    FrameworkSpec {
        id: FrameworkId::MetaPrompting,
        name: "Meta-Prompting",
        description: "Best for self-guided tasks. Instructs the model to generate its own prompts.",
        category: FrameworkCategory::Refinement,
        system_prompt: system_prompt!(
            "Meta-Prompting framework",
            "Analyze task requirements, generate targeted sub-prompts, combine insights.",
            "incorporating the meta-level guidance"
        ),
        output_contract: ENHANCED_PROMPT_ONLY,
    },
    FrameworkSpec {
        id: FrameworkId::Socratic,
        name: "Socratic Method",
        description: "Best for ambiguity reduction. Iteratively asks questions to refine understanding.",
        category: FrameworkCategory::Analysis,
        system_prompt: system_prompt!(
            "Socratic Method framework",
            "Ask clarifying questions internally, analyze the answers, refine understanding.",
            "incorporating the clarified insights"
        ),
        output_contract: ENHANCED_PROMPT_ONLY,
    },
    FrameworkSpec {
        id: FrameworkId::StepBack,
        name: "Step-Back Prompting",
        description: "Best for assumption re-evaluation. Encourages examining simpler approaches.",
        category: FrameworkCategory::Analysis,
        system_prompt: system_prompt!(
            "Step-Back framework",
            "Step back from initial assumptions, consider simpler alternatives, refine the approach.",
            "incorporating the simplified perspective"
        ),
        output_contract: ENHANCED_PROMPT_ONLY,
    },
    FrameworkSpec {
        id: FrameworkId::Pain,
        name: "PAIN Framework",
        description: "Best for problem-solving. Focuses on actionable insights for pain points.",
        category: FrameworkCategory::Analysis,
        system_prompt: system_prompt!(
            "PAIN framework (Problem, Action, Insight, Next Steps)",
            "Identify the core problem, determine actions, extract insights, plan next steps.",
            "incorporating the problem-solving structure"
        ),
        output_contract: ENHANCED_PROMPT_ONLY,
    },
];

/// Read-only view over the built-in frameworks.
#[derive(Debug, Clone, Copy)]
pub struct FrameworkCatalog {
    frameworks: &'static [FrameworkSpec],
}

impl Default for FrameworkCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FrameworkCatalog {
    pub fn builtin() -> Self {
        Self {
            frameworks: CATALOG,
        }
    }

    pub fn get(&self, id: &str) -> Option<&'static FrameworkSpec> {
        self.frameworks.iter().find(|spec| spec.id.as_str() == id)
    }

    /// Returns the system prompt for `id`.
    ///
    /// Unrecognized ids silently resolve to [`DEFAULT_FRAMEWORK`]'s prompt.
    pub fn get_system_prompt(&self, id: &str) -> &'static str {
        self.get(id)
            .or_else(|| self.get(DEFAULT_FRAMEWORK.as_str()))
            .map(|spec| spec.system_prompt)
            .unwrap_or_default()
    }

    pub fn list_frameworks(&self) -> Vec<FrameworkSummary> {
        self.frameworks
            .iter()
            .map(|spec| FrameworkSummary {
                id: spec.id,
                name: spec.name,
                description: spec.description,
                category: spec.category,
            })
            .collect()
    }

    /// The contract an output for `id` must meet, with the same fallback as
    /// [`get_system_prompt`](Self::get_system_prompt).
    pub fn output_contract(&self, id: &str) -> OutputContract {
        self.get(id)
            .map(|spec| spec.output_contract)
            .unwrap_or(ENHANCED_PROMPT_ONLY)
    }

    /// Checks a provider output against the framework's output contract.
    ///
    /// Unknown framework ids never validate.
    pub fn validate_output(&self, id: &str, enhanced_prompt: &str) -> bool {
        self.get(id)
            .is_some_and(|spec| spec.output_contract.accepts(enhanced_prompt))
    }
}

/// Chooses which frameworks an enhancement runs.
///
/// The request's list wins when non-empty, then the configured selection, then
/// the single [`DEFAULT_FRAMEWORK`].
pub fn resolve_frameworks(requested: Option<&[String]>, selected: &[String]) -> Vec<String> {
    match requested {
        Some(list) if !list.is_empty() => list.to_vec(),
        _ if !selected.is_empty() => selected.to_vec(),
        _ => vec![DEFAULT_FRAMEWORK.as_str().to_string()],
    }
}
