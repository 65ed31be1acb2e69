use anyhow::Result;

pub trait Dataset {
    type Batch;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn batches(&self, batch_size: usize) -> Result<Vec<Self::Batch>>;
}

pub trait RandomSplit<Ratio> {
    type Output;
    fn random_split(&self, ratio: Ratio) -> Result<Self::Output>;
}
