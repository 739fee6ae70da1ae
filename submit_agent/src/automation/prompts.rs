//! Instruction template sent at the start of every conversation.

use submit_agent_types::{BusinessProfile, SubmissionTarget};

/// Fixed part of the instruction.
pub const SUBMISSION_SYSTEM_PROMPT: &str = r##"
You are a web automation agent that submits a business listing to an online directory.

You receive (each round):
- A screenshot of the browser viewport (image_url)
- The current URL
- The results of the actions you proposed last round

Coordinates use a normalized 1000 x 1000 grid over the screenshot: x=0 is the
left edge, x=1000 the right edge, y=0 the top, y=1000 the bottom.

You MUST output a single JSON object ONLY, with shape:
{
  "actions": [ ... ],
  "text": "short description of the current state"
}

Allowed actions:
- { "kind": "click", "x": 0-1000, "y": 0-1000 }
- { "kind": "type_text", "x": 0-1000, "y": 0-1000, "text": "...", "press_enter": false }
  (clicks the field, clears it, then types)
- { "kind": "navigate", "url": "https://..." }
- { "kind": "scroll", "direction": "up" | "down" | "left" | "right" }
- { "kind": "drag", "x": .., "y": .., "dest_x": .., "dest_y": .. }
- { "kind": "wait" }
- { "kind": "go_back" }

Risk annotations (optional on any action):
- "risk": "requires_confirmation" with an "explanation" for irreversible steps
  such as accepting terms, paying, or creating an account.
- "risk": "block" for anything you must not do.

Completion rules:
- When the listing has been submitted, return "actions": [] and describe the
  confirmation you see in "text".
- If a CAPTCHA, puzzle or "verify you are human" check blocks you, return
  "actions": [] and say so in "text".
- Never return an empty action list while work remains.
- Fill only fields that match the business data. Leave optional fields empty
  when there is no matching value.
"##;

/// Instruction for one target: the fixed prompt plus the business fields.
pub fn build_instruction(profile: &BusinessProfile, target: &SubmissionTarget) -> String {
    let mut out = String::with_capacity(SUBMISSION_SYSTEM_PROMPT.len() + 512);
    out.push_str(SUBMISSION_SYSTEM_PROMPT.trim());
    out.push_str("\n\nDirectory: ");
    out.push_str(&target.name);
    out.push_str(" (");
    out.push_str(&target.entry_url);
    out.push_str(")\n\nBusiness data:\n");
    for (label, value) in profile.fields() {
        out.push_str("- ");
        out.push_str(&label);
        out.push_str(": ");
        out.push_str(&value);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_lists_fields() {
        let mut profile = BusinessProfile::new("Acme Plumbing");
        profile.city = "Austin".into();
        profile.website = "https://acme.example".into();
        let target = SubmissionTarget::new("d1", "Local Dir", "https://localdir.example/add");

        let text = build_instruction(&profile, &target);
        assert!(text.starts_with("You are a web automation agent"));
        assert!(text.contains("Directory: Local Dir (https://localdir.example/add)"));
        assert!(text.contains("- name: Acme Plumbing\n"));
        assert!(text.contains("- city: Austin\n"));
        assert!(!text.contains("- phone:"));
    }
}
