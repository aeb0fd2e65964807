use super::stages::AstStage;
use bson::Document;

/// An ordered list of stages.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AstPipeline {
    stages: Vec<AstStage>,
}

impl AstPipeline {
    pub fn new(stages: Vec<AstStage>) -> Self {
        Self { stages }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn stages(&self) -> &[AstStage] {
        &self.stages
    }

    pub fn into_stages(self) -> Vec<AstStage> {
        self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn last(&self) -> Option<&AstStage> {
        self.stages.last()
    }

    pub(crate) fn last_mut(&mut self) -> Option<&mut AstStage> {
        self.stages.last_mut()
    }

    /// A new pipeline with `stage` appended
    pub fn with_stage(mut self, stage: AstStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_stages<I: IntoIterator<Item = AstStage>>(mut self, stages: I) -> Self {
        self.stages.extend(stages);
        self
    }

    pub fn render(&self) -> Vec<Document> {
        self.render_with(true)
    }

    pub fn render_with(&self, implicit_and: bool) -> Vec<Document> {
        self.stages
            .iter()
            .map(|stage| stage.render_with(implicit_and))
            .collect()
    }
}
