//! Prompt and message assembly for every model call.
//!
//! Each builder is a pure function returning the system instruction and the
//! user message for one operation. Reference templates are embedded as
//! `<exampleN>` blocks ahead of the instruction so the model mimics their
//! structure.

use crate::llm::{ChatMessage, ContentBlock};

/// Sentence every generated template description must carry.
pub const DISCLAIMER: &str =
    "This template is not production ready and should only be used for inspiration";

const OUTPUT_DISCIPLINE: &str = "Do not return examples or explanation, only return the CloudFormation YAML template without ```yaml ```. Skip the preamble. Think step-by-step.";

const SYS_EXPLAIN: &str = "Your goal is to provide a concise and easily understandable step-by-step explanation of the AWS Architecture diagram. Skip the preamble.";

const EXPLAIN: &str = "You are an AWS Certified Solutions Architect with extensive experience in interpreting and explaining AWS Architecture diagrams.

When describing the architecture, follow these guidelines:

1. Identify and list the main components and AWS services depicted in the diagram.
2. Explain the flow of data and requests through the architecture, starting from the client or user interface and tracing the path through various components. Highlight each service responsibility and how it contributes to the overall system.

Do not provide summary.";

const SYS_SUMMARIZE: &str = "List all the AWS Services in the document. Do not output anything else.";

const SYS_GENERATE: &str = "You are an expert AWS CloudFormation developer. Your task is to convert instructions into a valid CloudFormation template in YAML format.
Example CloudFormation YAML templates are given in <example></example> XML tags to show best practices.
Accept a step-by-step explanation of the AWS Architecture encapsulated between <explain></explain> XML tags and generate its CloudFormation template.";

const SYS_REITERATE: &str = "You are an AWS CloudFormation expert and a master of AWS best practices.
Your task is to review the CloudFormation template provided between <cloudformation></cloudformation> XML tags and enhance it to align with AWS recommendations and guidelines.

The user provides examples encapsulated within <example></example> XML tags. They show AWS best practices in action.

Your output is a revised version of the provided CloudFormation template.";

const SYS_UPDATE: &str = "You are an expert AWS CloudFormation developer tasked with updating CloudFormation code given in YAML format.

1. You will receive the update instruction in <update></update> and will need to update the CloudFormation code in <cloudformation></cloudformation>.
2. You will be provided with example AWS CloudFormation between <example></example> XML tags for reference.

Only make the changes the update instruction asks for.";

const SYS_RESOLVE: &str = "You are an AWS CloudFormation expert skilled in analyzing and troubleshooting CloudFormation templates. Your task is as follows:

1. Review the provided CloudFormation template between <cloudformation></cloudformation> and error message <error></error> carefully.
2. Identify the root cause of the error in the template.
3. Provide a corrected version of the CloudFormation template that resolves the issue.

Leverage the examples provided between <example></example> XML tags.";

/// System instruction plus messages for one model call.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub messages: Vec<ChatMessage>,
}

impl Prompt {
    fn single(system: &str, content: Vec<ContentBlock>) -> Self {
        Self {
            system: system.to_string(),
            messages: vec![ChatMessage::user(content)],
        }
    }
}

/// Image plus the explain instruction.
pub fn explain(image: &[u8], media_type: &str) -> Prompt {
    Prompt::single(
        SYS_EXPLAIN,
        vec![
            ContentBlock::Text(EXPLAIN.to_string()),
            ContentBlock::Image {
                media_type: media_type.to_string(),
                bytes: image.to_vec(),
            },
        ],
    )
}

/// Service list used as the reference search query.
pub fn summarize(explanation: &str) -> Prompt {
    Prompt::single(
        SYS_SUMMARIZE,
        vec![ContentBlock::Text(format!(
            "<document>\n{}\n</document>",
            explanation
        ))],
    )
}

pub fn generate(references: &[String], explanation: &str) -> Prompt {
    let instruction = format!(
        "Create CloudFormation code only for AWS Services present in <explain></explain>

<explain>
{explanation}
</explain>

- Mimic the practices of example CloudFormation templates given between <example></example> XML tags.
- Use AWS CloudFormation Pseudo parameters where necessary.
- Use structure of example templates.
- Add into description \"{DISCLAIMER}\"

{OUTPUT_DISCIPLINE}"
    );
    Prompt::single(SYS_GENERATE, with_references(references, instruction))
}

/// Best-practices pass over a freshly generated template.
pub fn reiterate(references: &[String], template: &str) -> Prompt {
    let instruction = format!(
        "Reiterate the CloudFormation template. Also make sure description consists \"{DISCLAIMER}\".
<cloudformation>
{template}
</cloudformation>

{OUTPUT_DISCIPLINE}"
    );
    Prompt::single(SYS_REITERATE, with_references(references, instruction))
}

pub fn update(references: &[String], template: &str, instruction: &str) -> Prompt {
    let instruction = format!(
        "I need your assistance in updating an AWS CloudFormation template. Please review the following:

<cloudformation>
{template}
</cloudformation>

<update>
{instruction}
</update>

Also make sure description consists \"{DISCLAIMER}\".

{OUTPUT_DISCIPLINE}"
    );
    Prompt::single(SYS_UPDATE, with_references(references, instruction))
}

pub fn resolve_error(references: &[String], template: &str, error: &str) -> Prompt {
    let instruction = format!(
        "I need your assistance in troubleshooting an issue with an AWS CloudFormation template. Please review the following:

<cloudformation>
{template}
</cloudformation>

<error>
{error}
</error>

Also make sure description consists \"{DISCLAIMER}\".

{OUTPUT_DISCIPLINE}"
    );
    Prompt::single(SYS_RESOLVE, with_references(references, instruction))
}

fn with_references(references: &[String], instruction: String) -> Vec<ContentBlock> {
    let mut content: Vec<ContentBlock> = references
        .iter()
        .enumerate()
        .map(|(idx, document)| {
            ContentBlock::Text(format!(
                "Take this example CloudFormation YAML code as a reference <example{idx}></example{idx}>:\n<example{idx}>\n{document}\n</example{idx}>"
            ))
        })
        .collect();
    content.push(ContentBlock::Text(instruction));
    content
}

/// Remove a leading/trailing Markdown code fence and surrounding whitespace.
pub fn strip_code_fences(text: &str) -> String {
    let mut body = text.trim();

    if body.starts_with("```") {
        body = match body.find('\n') {
            Some(newline) => &body[newline + 1..],
            None => "",
        };
    }

    let trimmed = body.trim_end();
    body = trimmed.strip_suffix("```").unwrap_or(trimmed);

    body.trim().to_string()
}
