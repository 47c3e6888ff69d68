use async_trait::async_trait;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout,
};
use tracing::debug;

use crate::errors::AppResult;
use crate::paging::PageCursor;
use crate::places::{BusinessStatus, Candidate};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionPolicy {
    /// Resolve without prompting when the first page holds a single candidate.
    pub auto_select_single_result: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Chosen(Candidate),
    Skipped,
    Cancelled,
    /// The operator's input stream ended; no later prompt can be answered.
    InputClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    Pick(usize),
    Next,
    Previous,
    Skip,
    Cancel,
}

impl OperatorCommand {
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim().to_ascii_lowercase();
        match trimmed.as_str() {
            "n" | "next" => Some(OperatorCommand::Next),
            "p" | "prev" => Some(OperatorCommand::Previous),
            "s" | "skip" => Some(OperatorCommand::Skip),
            "q" | "quit" => Some(OperatorCommand::Cancel),
            other => other
                .parse::<usize>()
                .ok()
                .filter(|index| *index > 0)
                .map(OperatorCommand::Pick),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorNotice {
    InvalidInput(String),
    NoPreviousPage,
    NoMoreResults,
}

/// What the operator sees at a prompt.
#[derive(Debug)]
pub struct PageView<'a> {
    pub query: &'a str,
    pub page_index: usize,
    pub candidates: &'a [Candidate],
    pub has_previous: bool,
    pub has_next: bool,
}

#[async_trait]
pub trait Operator: Send {
    /// Show `view` and read one line. `None` means input was closed.
    async fn prompt(&mut self, view: &PageView<'_>) -> AppResult<Option<String>>;

    async fn notice(&mut self, notice: SelectorNotice) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Selector {
    policy: SelectionPolicy,
}

impl Selector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self { policy }
    }

    pub async fn select(
        &self,
        cursor: &mut PageCursor,
        operator: &mut dyn Operator,
    ) -> AppResult<Selection> {
        if self.policy.auto_select_single_result {
            if let Some(page) = cursor.page(0).filter(|page| page.len() == 1) {
                debug!(query = cursor.query(), "auto-selecting single result");
                return Ok(Selection::Chosen(page.candidates[0].clone()));
            }
        }

        let mut index = 0;
        loop {
            let input = {
                let Some(page) = cursor.page(index) else {
                    return Ok(Selection::Skipped);
                };
                let view = PageView {
                    query: cursor.query(),
                    page_index: index,
                    candidates: &page.candidates,
                    has_previous: index > 0,
                    has_next: cursor.page(index + 1).is_some() || cursor.can_fetch_more(),
                };
                operator.prompt(&view).await?
            };

            let Some(input) = input else {
                return Ok(Selection::InputClosed);
            };

            match OperatorCommand::parse(&input) {
                Some(OperatorCommand::Pick(choice)) => {
                    let picked = cursor
                        .page(index)
                        .and_then(|page| page.candidates.get(choice - 1))
                        .cloned();
                    match picked {
                        Some(candidate) => return Ok(Selection::Chosen(candidate)),
                        None => {
                            operator
                                .notice(SelectorNotice::InvalidInput(input))
                                .await?
                        }
                    }
                }
                Some(OperatorCommand::Previous) if index > 0 => index -= 1,
                Some(OperatorCommand::Previous) => {
                    operator.notice(SelectorNotice::NoPreviousPage).await?
                }
                Some(OperatorCommand::Next) => {
                    if cursor.page(index + 1).is_some() || cursor.fetch_next().await.is_some() {
                        index += 1;
                    } else {
                        operator.notice(SelectorNotice::NoMoreResults).await?;
                    }
                }
                Some(OperatorCommand::Skip) => return Ok(Selection::Skipped),
                Some(OperatorCommand::Cancel) => return Ok(Selection::Cancelled),
                None => operator.notice(SelectorNotice::InvalidInput(input)).await?,
            }
        }
    }
}

/// Interactive operator, on stdin/stdout unless built with [`ConsoleOperator::with_io`].
pub struct ConsoleOperator<R = BufReader<Stdin>, W = Stdout> {
    reader: R,
    out: W,
}

impl ConsoleOperator {
    pub fn new() -> Self {
        Self::with_io(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl Default for ConsoleOperator {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> ConsoleOperator<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn with_io(reader: R, out: W) -> Self {
        Self { reader, out }
    }

    async fn write(&mut self, text: &str) -> AppResult<()> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<R, W> Operator for ConsoleOperator<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn prompt(&mut self, view: &PageView<'_>) -> AppResult<Option<String>> {
        let rendered = render_page(view);
        self.write(&rendered).await?;
        let mut line = Vec::new();
        if self.reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(None);
        }
        // Undecodable bytes become U+FFFD and fail command parsing.
        Ok(Some(String::from_utf8_lossy(&line).trim().to_string()))
    }

    async fn notice(&mut self, notice: SelectorNotice) -> AppResult<()> {
        let message = match notice {
            SelectorNotice::InvalidInput(input) => {
                format!("Invalid input {input:?}: enter a listed number, n, p, s or q.\n")
            }
            SelectorNotice::NoPreviousPage => "Already on the first page.\n".to_string(),
            SelectorNotice::NoMoreResults => "No more results.\n".to_string(),
        };
        self.write(&message).await
    }
}

pub fn render_page(view: &PageView<'_>) -> String {
    let mut text = format!(
        "\nResults for \"{}\" (page {}):\n",
        view.query,
        view.page_index + 1
    );
    for (offset, candidate) in view.candidates.iter().enumerate() {
        let primary_type = candidate
            .primary_type
            .as_ref()
            .map(|t| t.text.as_str())
            .unwrap_or("-");
        let address = candidate.formatted_address.as_deref().unwrap_or("-");
        let flag = match candidate.business_status {
            BusinessStatus::ClosedPermanently => " [permanently closed]",
            BusinessStatus::ClosedTemporarily => " [temporarily closed]",
            BusinessStatus::Operating | BusinessStatus::Unknown => "",
        };
        text.push_str(&format!(
            "  {:>2}. {} | {} | {}{}\n",
            offset + 1,
            candidate.display_name.text,
            primary_type,
            address,
            flag
        ));
    }

    let mut options = vec![format!("1-{} select", view.candidates.len())];
    if view.has_next {
        options.push("n next page".into());
    }
    if view.has_previous {
        options.push("p previous page".into());
    }
    options.push("s skip".into());
    options.push("q quit".into());
    text.push_str(&format!("[{}] > ", options.join(", ")));
    text
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use async_trait::async_trait;

    use super::{Operator, PageView, SelectorNotice};
    use crate::errors::AppResult;

    /// Replays canned input lines; input closes when the script runs out.
    #[derive(Default)]
    pub struct ScriptedOperator {
        inputs: VecDeque<String>,
        pub prompts: Vec<usize>,
        pub notices: Vec<SelectorNotice>,
    }

    impl ScriptedOperator {
        pub fn new(inputs: &[&str]) -> Self {
            Self {
                inputs: inputs.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Operator for ScriptedOperator {
        async fn prompt(&mut self, view: &PageView<'_>) -> AppResult<Option<String>> {
            self.prompts.push(view.page_index);
            Ok(self.inputs.pop_front())
        }

        async fn notice(&mut self, notice: SelectorNotice) -> AppResult<()> {
            self.notices.push(notice);
            Ok(())
        }
    }
}
