//! Fixed prompt text for the plan, act, reflect and note stages.

use chrono::Local;

/// Header with today's date and the coordinate space the oracle must use.
pub fn context_header(width: u32, height: u32) -> String {
    let today = Local::now();
    format!(
        "Today's date is: {}\nScreenshot resolution: {}x{} (width x height). All coordinates refer to this image.\n\n",
        today.format("%B %d, %Y"),
        width,
        height
    )
}

pub static PLAN_ROLE: &str = "You are an agent who can operate a mobile phone on behalf of a user. \
Your goal is to track progress and devise high-level plans to achieve the user's request.\n\n";

pub static ACT_ROLE: &str = "You are an agent who can operate a mobile phone on behalf of a user. \
Your goal is to decide the next action to perform based on the current state of the phone and the user's request.\n\n";

pub static REFLECT_ROLE: &str = "You are an agent who can operate a mobile phone on behalf of a user. \
Your goal is to verify whether the last action produced the expected behavior and to keep track of the overall progress.\n\n";

pub static NOTE_ROLE: &str = "You are a helpful assistant for operating mobile phones. \
Your goal is to take notes of important content relevant to the user's request.\n\n";

pub static PLAN_GUIDELINES: &str = "### Guidelines ###\n\
1. Use the `open_app` action whenever you want to open an app, do not use the app drawer.\n\
2. Use search to quickly find a file or entry with a specific name, if search is available.\n\
3. For requests that explicitly require an answer, make 'perform the `answer` action' the last step of the plan.\n\n";

pub static FIRST_PLAN_FORMAT: &str = "---\n\
Make a high-level plan to achieve the user's request. If the request is complex, break it down into subgoals. \
The screenshot displays the starting state of the phone.\n\n\
Provide your output in the following format which contains two parts:\n\
### Thought ###\n\
A detailed explanation of your rationale for the plan and subgoals.\n\n\
### Plan ###\n\
1. first subgoal\n\
2. second subgoal\n\
...\n";

pub static REPLAN_FORMAT: &str = "---\n\
Carefully assess the current status and the provided screenshot. Check if the current plan needs to be revised.\n\
If you are confident that the user request has been fully completed and no further actions are required, \
write only \"Finished\" as the plan. If you are stuck with errors, think step by step about whether the overall plan \
needs to be revised to address the error. Do not mark the plan as \"Finished\" while an `answer` action is still pending.\n\n\
Provide your output in the following format, which contains three parts:\n\n\
### Thought ###\n\
An explanation of your rationale for the updated plan.\n\n\
### Historical Operations ###\n\
Add the most recently completed subgoal on top of the existing historical operations. Do not delete any existing entry.\n\n\
### Plan ###\n\
The updated plan, with the next subgoal first.\n";

/// Atomic action vocabulary, one line per action.
pub static ATOMIC_ACTIONS: &[(&str, &str)] = &[
    ("answer(text)", "Answer the user's question. Example: {\"action\": \"answer\", \"text\": \"the answer\"}"),
    ("click(coordinate)", "Click the point (x, y). Example: {\"action\": \"click\", \"coordinate\": [540, 1200]}"),
    ("long_press(coordinate)", "Long press the point (x, y). Example: {\"action\": \"long_press\", \"coordinate\": [540, 1200]}"),
    ("type(text)", "Type text into the activated input box. Click the box first if it is not active. Example: {\"action\": \"type\", \"text\": \"hello\"}"),
    ("system_button(button)", "Press Back, Home, Menu or Enter. Example: {\"action\": \"system_button\", \"button\": \"Home\"}"),
    ("swipe(coordinate, coordinate2)", "Swipe from coordinate to coordinate2. Keep both points inside the scrollable area and away from the keyboard. Example: {\"action\": \"swipe\", \"coordinate\": [540, 1600], \"coordinate2\": [540, 600]}"),
    ("open_app(text)", "Open an app by name. Example: {\"action\": \"open_app\", \"text\": \"Settings\"}"),
    ("wait(time)", "Wait for the screen to change. Example: {\"action\": \"wait\", \"time\": 2}"),
    ("terminate(status)", "End the task as \"success\" or \"failure\" when it cannot be done. Example: {\"action\": \"terminate\", \"status\": \"failure\"}"),
];

pub static ACT_FORMAT: &str = "---\n\
IMPORTANT:\n\
1. Do NOT repeat previously failed actions multiple times. Try another action.\n\
2. Prioritize the current subgoal.\n\n\
Provide your output in the following format, which contains three parts:\n\
### Thought ###\n\
A detailed explanation of your rationale for the chosen action.\n\n\
### Action ###\n\
Exactly one action as a valid JSON object with the `action` field and its arguments.\n\n\
### Description ###\n\
A brief description of the chosen action. Do not describe the expected outcome.\n";

pub static REFLECT_FORMAT: &str = "---\n\
Carefully examine the information above to determine whether the last action produced the expected behavior.\n\
Note: if a swipe shows exactly the same content before and after, it is C: the content may already be at the end.\n\n\
Provide your output in the following format containing two parts:\n\
### Outcome ###\n\
Answer \"A\", \"B\" or \"C\":\n\
A: Successful or partially successful. The result meets the expectation.\n\
B: Failed. The last action led to a wrong page. I need to return to the previous state.\n\
C: Failed. The last action produced no changes.\n\n\
### Error Description ###\n\
If the action failed, describe the error and its likely cause. If it succeeded, write \"None\".\n";

pub static NOTE_FORMAT: &str = "---\n\
Identify any important content on the current screen that needs to be recorded.\n\
Do not take notes on low-level actions; only keep significant textual or visual information relevant to the request. \
Do not make up content you are not sure about.\n\n\
Provide your output in the following format:\n\
### Important Notes ###\n\
The updated important notes, combining the old and new ones. If there is nothing new, copy the existing notes.\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_header() {
        let header = context_header(1092, 2408);
        assert!(header.contains("Today's date is"));
        assert!(header.contains("1092x2408"));
    }

    #[test]
    fn test_action_examples_are_valid_json() {
        for (_, description) in ATOMIC_ACTIONS {
            let example = description.split("Example: ").nth(1).unwrap();
            let value: serde_json::Value = serde_json::from_str(example).unwrap();
            assert!(value.get("action").is_some());
        }
    }
}
