use ratatui::layout::Rect;
use tokio::task::JoinHandle;
use tracing::warn;
use wanderlust_core::{
    Conversation, ConversationEntry, MapState, PollerState, RunError, SessionStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

pub struct App {
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Chat input
    pub input: String,
    pub cursor: usize, // cursor position in input, in chars

    // Chat panel
    pub chat_scroll: u16,
    pub chat_height: u16, // Inner height of chat area for scroll calculations
    pub chat_width: u16,  // Inner width of chat area for wrap calculations
    pub follow_tail: bool,
    pub chat_area: Option<Rect>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Local notice for submissions the core refused (empty, busy)
    pub notice: Option<String>,

    pub conversation: Conversation,
    pub submit_task: Option<JoinHandle<Result<String, RunError>>>,

    // Snapshots of the shared stores, refreshed when they change
    pub entries: Vec<ConversationEntry>,
    pub map_state: MapState,
    pub status: SessionStatus,
}

impl App {
    pub fn new(conversation: Conversation) -> Self {
        let entries = conversation.log().entries();
        let map_state = conversation.map().get();
        let status = conversation.status();

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,

            input: String::new(),
            cursor: 0,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            follow_tail: true,
            chat_area: None,

            animation_frame: 0,
            notice: None,

            conversation,
            submit_task: None,

            entries,
            map_state,
            status,
        }
    }

    /// Pull fresh snapshots from the conversation, log and map stores
    pub fn refresh(&mut self) {
        self.entries = self.conversation.log().entries();
        self.map_state = self.conversation.map().get();
        self.status = self.conversation.status();
    }

    pub fn is_busy(&self) -> bool {
        self.status.state.is_busy() || self.submit_task.is_some()
    }

    pub fn state_label(&self) -> &'static str {
        match self.status.state {
            PollerState::Idle => "ready",
            PollerState::Submitting => "sending",
            PollerState::AwaitingRun { .. } => "thinking",
            PollerState::Completed { .. } => "done",
        }
    }

    /// Hand the current input to the conversation on a background task
    pub fn submit_input(&mut self) {
        if self.input.trim().is_empty() || self.is_busy() {
            return;
        }

        let text = std::mem::take(&mut self.input);
        self.cursor = 0;
        self.notice = None;
        self.follow_tail = true;

        let conversation = self.conversation.clone();
        self.submit_task = Some(tokio::spawn(async move { conversation.submit(&text).await }));
    }

    /// Collect the result of a finished submission, if there is one
    pub async fn reap_submit_task(&mut self) {
        let finished = self
            .submit_task
            .as_ref()
            .is_some_and(|task| task.is_finished());
        if !finished {
            return;
        }
        let Some(task) = self.submit_task.take() else {
            return;
        };

        match task.await {
            Ok(Ok(_run_id)) => {}
            // The conversation already put transport errors in the banner
            Ok(Err(RunError::Transport(_))) => {}
            Ok(Err(e)) => self.notice = Some(e.to_string()),
            Err(e) => {
                warn!(error = %e, "Submit task did not finish cleanly");
                self.notice = Some("Message could not be sent".to_string());
            }
        }
    }

    pub fn cancel_run(&mut self) {
        let conversation = self.conversation.clone();
        tokio::spawn(async move { conversation.cancel().await });
    }

    pub fn dismiss_banner(&mut self) {
        self.notice = None;
        self.conversation.dismiss_banner();
    }

    /// Error text for the footer, core banner first
    pub fn banner(&self) -> Option<&str> {
        self.status.banner.as_deref().or(self.notice.as_deref())
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.is_busy() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    // Chat scrolling
    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
        self.follow_tail = false;
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines);
        // Clamped against content height while rendering
    }

    pub fn scroll_to_bottom(&mut self) {
        self.follow_tail = true;
    }

    pub fn half_page(&self) -> u16 {
        (self.chat_height / 2).max(1)
    }

    /// Fix up the scroll offset once the rendered line count is known
    pub fn clamp_scroll(&mut self, total_lines: u16) {
        let max_scroll = total_lines.saturating_sub(self.chat_height);
        if self.follow_tail || self.chat_scroll >= max_scroll {
            self.chat_scroll = max_scroll;
            self.follow_tail = true;
        }
    }
}
