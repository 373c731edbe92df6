use crate::common::{KioskError, Result};
use ndarray::{Array4, ArrayD, CowArray};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use std::path::Path;
use std::sync::Arc;

/// An ONNX Runtime session with a single image input.
pub struct OnnxModel {
    name: String,
    session: Session,
    _environment: Arc<Environment>,
}

impl OnnxModel {
    pub fn load(name: &str, model_path: &Path, optimization_level: u32) -> Result<Self> {
        let environment = Arc::new(
            Environment::builder()
                .with_name(name)
                .build()
                .map_err(|e| KioskError::Model(format!("Failed to create environment: {}", e)))?
        );

        if !model_path.exists() {
            return Err(KioskError::Model(
                format!("{} model not found at: {:?}", name, model_path)
            ));
        }

        let opt_level = match optimization_level {
            0 => GraphOptimizationLevel::Disable,
            1 => GraphOptimizationLevel::Level1,
            2 => GraphOptimizationLevel::Level2,
            _ => GraphOptimizationLevel::Level3,
        };
        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(opt_level)?
            .with_model_from_file(model_path)?;

        tracing::info!("Loaded {} model from {}", name, model_path.display());
        Ok(Self {
            name: name.to_string(),
            session,
            _environment: environment,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run inference and copy every output out as an `f32` array.
    pub fn run(&self, input: Array4<f32>) -> Result<Vec<ArrayD<f32>>> {
        let cow_array = CowArray::from(input.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let mut arrays = Vec::with_capacity(outputs.len());
        for output in &outputs {
            arrays.push(output.try_extract::<f32>()?.view().to_owned());
        }
        Ok(arrays)
    }
}
