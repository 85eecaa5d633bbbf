//! Debugger call stacks.
//!
//! A [`StackTrace`] is an owned tree: each node carries its synchronous
//! frames and, when async stack tracking is on, the stack of the task that
//! scheduled it. Depth is bounded by the debugger's async call-stack depth,
//! so plain recursion is fine.

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// One frame of a JavaScript call stack.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallFrame {
    /// Function name (empty for top-level code).
    pub function_name: String,
    /// Id of the script the frame executes in.
    pub script_id: String,
    /// Script URL.
    #[serde(rename = "URL")]
    pub url: String,
    /// Zero-based line.
    pub line_number: i64,
    /// Zero-based column.
    pub column_number: i64,
}

impl CallFrame {
    /// Decode a `Runtime.CallFrame` object.
    pub fn from_message(msg: &Message) -> Self {
        Self {
            function_name: msg.string("functionName"),
            script_id: msg.string("scriptId"),
            url: msg.string("url"),
            line_number: msg.int("lineNumber"),
            column_number: msg.int("columnNumber"),
        }
    }
}

/// A call stack with an optional async parent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackTrace {
    /// Label for async stacks (e.g. `"setTimeout"`).
    pub description: String,
    /// Innermost frame first.
    pub call_frames: Vec<CallFrame>,
    /// Stack of the code that scheduled this one.
    pub parent: Option<Box<StackTrace>>,
    /// Id of a parent stack held by another debugger, if any.
    pub parent_id: String,
}

impl StackTrace {
    /// Decode a `Runtime.StackTrace` object.
    pub fn from_message(msg: &Message) -> Self {
        Self {
            description: msg.string("description"),
            call_frames: msg
                .messages("callFrames")
                .iter()
                .map(CallFrame::from_message)
                .collect(),
            parent: msg
                .message("parent")
                .map(|parent| Box::new(Self::from_message(&parent))),
            // parentId is itself an object ({id, debuggerId}); only the id matters.
            parent_id: msg
                .message("parentId")
                .map(|p| p.string("id"))
                .unwrap_or_else(|| msg.string("parentId")),
        }
    }

    /// Decode the stack stored under `key`, if present.
    pub fn from_field(msg: &Message, key: &str) -> Option<Self> {
        msg.message(key).map(|st| Self::from_message(&st))
    }

    /// Frames that identify the code responsible for this stack.
    ///
    /// An async continuation can report an empty frame list; the scheduling
    /// code's frames then stand in for it.
    pub fn effective_frames(&self) -> &[CallFrame] {
        match &self.parent {
            Some(parent) if self.call_frames.is_empty() => &parent.call_frames,
            _ => &self.call_frames,
        }
    }

    /// Script ids of [`effective_frames`](Self::effective_frames), innermost first.
    pub fn script_ids(&self) -> Vec<String> {
        self.effective_frames()
            .iter()
            .map(|cf| cf.script_id.clone())
            .collect()
    }

    /// Number of stacks in the parent chain, including this one.
    pub fn depth(&self) -> usize {
        1 + self.parent.as_ref().map_or(0, |p| p.depth())
    }
}
