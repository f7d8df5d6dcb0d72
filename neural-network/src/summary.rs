use std::fmt;

/// One row of a [`NetworkSummary`].
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSummary {
    pub name: String,
    pub output_shape: Vec<usize>,
    pub params: usize,
}

/// Per-layer output shapes and parameter counts for a given input shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSummary {
    pub input_shape: Vec<usize>,
    pub layers: Vec<LayerSummary>,
}

impl NetworkSummary {
    pub fn total_params(&self) -> usize {
        self.layers.iter().map(|l| l.params).sum()
    }

    /// Size of the parameters in megabytes, at four bytes per value.
    pub fn params_size_mb(&self) -> f64 {
        (self.total_params() * std::mem::size_of::<f32>()) as f64 / (1024.0 * 1024.0)
    }
}

fn shape_string(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("[{}]", dims.join(", "))
}

impl fmt::Display for NetworkSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rule = "-".repeat(78);
        writeln!(f, "{rule}")?;
        writeln!(f, "{:<5} {:<44} {:<18} {:>8}", "#", "Layer", "Output Shape", "Params")?;
        writeln!(f, "{}", "=".repeat(78))?;
        writeln!(
            f,
            "{:<5} {:<44} {:<18} {:>8}",
            "",
            "Input",
            shape_string(&self.input_shape),
            0
        )?;
        for (index, layer) in self.layers.iter().enumerate() {
            writeln!(
                f,
                "{:<5} {:<44} {:<18} {:>8}",
                index,
                layer.name,
                shape_string(&layer.output_shape),
                layer.params
            )?;
        }
        writeln!(f, "{rule}")?;
        writeln!(f, "Total params: {}", self.total_params())?;
        writeln!(f, "Params size (MB): {:.2}", self.params_size_mb())?;
        write!(f, "{rule}")
    }
}
