use crate::bar::{Action, Prompt};
use ratatui::{
    buffer::Buffer,
    crossterm::event::{Event, KeyCode, KeyEvent},
    layout::{Constraint, Layout, Margin, Position, Rect},
    style::Stylize,
    text::Line,
    widgets::{Block, BorderType, Clear, Padding, Paragraph, StatefulWidget, Widget, Wrap},
};
use tui_input::{Input, backend::crossterm::EventHandler};

#[derive(Debug)]
pub enum State {
    Open,
    Confirmed,
    Dismissed,
}

#[derive(Debug)]
pub enum Popup {
    TriggerAction(Action, Input),
    InvalidInput(Action, String),
}

impl Popup {
    pub fn handle_event(&mut self, event: &Event) -> State {
        if let Some(KeyEvent { code, .. }) = event.as_key_press_event() {
            match code {
                KeyCode::Enter => {
                    return State::Confirmed;
                }
                KeyCode::Esc => {
                    return State::Dismissed;
                }
                _ => {}
            }
        }

        if let Self::TriggerAction(_, input) = self {
            input.handle_event(event);
        }

        State::Open
    }

    fn render_hex_prompt(
        area: Rect,
        buf: &mut Buffer,
        action: Action,
        hint: &str,
        input: &Input,
    ) -> Position {
        let mut lines = vec![
            Line::from(vec![
                "Please enter the hex input for the ".into(),
                action.name().bold(),
                " action.".into(),
            ]),
            Line::default(),
            Line::from(vec!["Format: ".into(), hint.bold(), ".".into()]),
        ];

        // Shows what will be sent, recomputed on every edit
        if let Some(preview) = action.preview(input.value()) {
            lines.push(Line::from(vec!["Request: ".into(), preview.green()]));
        }

        let par = Paragraph::new(lines).wrap(Wrap { trim: false });

        // Split message into multiple lines if too long
        let width = par
            .line_width()
            .max(40)
            .min(area.width.saturating_sub(20) as usize);
        let lines = par.line_count(width as u16);

        let inner = Self::render_popup(area, buf, "Trigger action", width, lines + 2);
        let [top, bottom] =
            Layout::vertical([Constraint::Fill(1), Constraint::Length(1)]).areas(inner);

        par.render(top, buf);
        input.value().render(bottom, buf);

        (bottom.x + input.visual_cursor() as u16, bottom.y).into()
    }

    fn render_trigger_action(area: Rect, buf: &mut Buffer, action: Action) {
        let msg = Line::from(vec![
            "Press enter to trigger the ".into(),
            action.name().bold(),
            " action.".into(),
        ]);
        let inner = Self::render_popup(area, buf, "Trigger action", msg.width(), 1);

        msg.render(inner, buf);
    }

    fn render_invalid_input(area: Rect, buf: &mut Buffer, action: Action, reason: &str) {
        let msg = Line::from(vec![
            "The input for the ".into(),
            action.name().bold(),
            " action is invalid: ".into(),
            reason.into(),
        ]);
        let inner = Self::render_popup(area, buf, "Action failed", msg.width(), 1);

        msg.render(inner, buf);
    }

    fn render_popup(
        area: Rect,
        buf: &mut Buffer,
        title: &str,
        width: usize,
        height: usize,
    ) -> Rect {
        // Increase size by block padding and border
        let pad = Padding::proportional(1);
        let width = (width as u16) + pad.left + pad.right + 2;
        let height = (height as u16) + pad.top + pad.bottom + 2;
        let popup = area.centered(Constraint::Length(width), Constraint::Length(height));
        let block = Block::bordered()
            .border_type(BorderType::Rounded)
            .padding(pad)
            .title(Line::from(vec![" ".into(), title.bold(), " ".into()]).centered());
        let inner = block.inner(popup);

        // Clear area around the block with additional margin
        Clear.render(popup.outer(Margin::new(2, 1)), buf);
        block.render(popup, buf);

        inner
    }
}

impl StatefulWidget for &Popup {
    type State = Option<Position>;

    fn render(self, area: Rect, buf: &mut Buffer, state: &mut Self::State) {
        match self {
            Popup::TriggerAction(action, input) => match action.prompt() {
                Some(Prompt::Hex(hint)) => {
                    // Update state with current input prompt cursor position
                    *state = Some(Popup::render_hex_prompt(area, buf, *action, hint, input));
                }
                Some(Prompt::Confirm) | None => Popup::render_trigger_action(area, buf, *action),
            },
            Popup::InvalidInput(action, reason) => {
                Popup::render_invalid_input(area, buf, *action, reason);
            }
        }
    }
}
