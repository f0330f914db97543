//! Minimal conforming network: a named parameter table

use super::Network;
use crate::backend::TensorHandle;
use crate::registry::Registry;
use std::any::Any;
use std::collections::BTreeMap;

/// Network holding named parameter tensors grouped by layer
///
/// No architecture, no forward pass: this is the smallest type satisfying
/// the [`Network`] contract, used by the reference trainer and throughout
/// the crate's tests. Real architectures live outside the core.
#[derive(Debug, Default)]
pub struct ParameterNetwork {
    layers: BTreeMap<String, BTreeMap<String, TensorHandle>>,
}

impl ParameterNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_parameter(
        &mut self,
        layer: impl Into<String>,
        name: impl Into<String>,
        tensor: TensorHandle,
    ) {
        self.layers
            .entry(layer.into())
            .or_default()
            .insert(name.into(), tensor);
    }

    /// Live handle to one parameter
    pub fn parameter(&self, layer: &str, name: &str) -> Option<TensorHandle> {
        self.layers.get(layer).and_then(|l| l.get(name)).cloned()
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    /// All parameters in deterministic order
    pub fn parameters(&self) -> Vec<TensorHandle> {
        self.layers
            .values()
            .flat_map(|l| l.values().cloned())
            .collect()
    }
}

impl Network for ParameterNetwork {
    fn deep_copy(&self) -> Box<dyn Network> {
        let mut copy = ParameterNetwork::new();
        for (layer, params) in &self.layers {
            for (name, tensor) in params {
                copy.add_parameter(layer.clone(), name.clone(), tensor.deep_copy());
            }
        }
        Box::new(copy)
    }

    fn registry(&self) -> Registry {
        let mut layers = Registry::new();
        for (layer, params) in &self.layers {
            let mut layer_registry = Registry::new();
            for (name, tensor) in params {
                layer_registry.set(name.clone(), tensor.clone());
            }
            layers.set(layer.clone(), layer_registry);
        }
        let mut root = Registry::new();
        root.set("layers", layers);
        root
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_layer_network() -> ParameterNetwork {
        let mut net = ParameterNetwork::new();
        net.add_parameter("conv1", "weights", TensorHandle::from_vec(vec![1.0, 2.0]));
        net.add_parameter("conv1", "bias", TensorHandle::from_vec(vec![0.5]));
        net.add_parameter("fc", "weights", TensorHandle::from_vec(vec![3.0]));
        net
    }

    #[test]
    fn test_registry_exposes_layer_parameters() {
        let net = two_layer_network();
        let registry = net.registry();
        assert!(registry.get_path("layers.conv1.weights").is_some());
        assert!(registry.get_path("layers.fc.weights").is_some());
        assert!(registry.get_path("layers.fc.bias").is_none());
    }

    #[test]
    fn test_registry_tensors_alias_live_parameters() {
        let net = two_layer_network();
        let registry = net.registry();
        let via_registry = registry.get_path("layers.conv1.bias").unwrap();
        let via_registry = via_registry.as_tensor().unwrap();
        assert!(via_registry.aliases(&net.parameter("conv1", "bias").unwrap()));
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let net = two_layer_network();
        let copy = net.deep_copy();
        let copy_net = copy.as_any().downcast_ref::<ParameterNetwork>().unwrap();

        let original = net.parameter("conv1", "weights").unwrap();
        let copied = copy_net.parameter("conv1", "weights").unwrap();
        assert!(!original.aliases(&copied));

        copied.write()[0] = 99.0;
        assert_eq!(original.first(), 1.0);
    }

    #[test]
    fn test_parameters_in_deterministic_order() {
        let net = two_layer_network();
        let params = net.parameters();
        // conv1.bias, conv1.weights, fc.weights (sorted by layer then name)
        assert_eq!(params.len(), 3);
        assert_eq!(params[0].first(), 0.5);
        assert_eq!(params[1].first(), 1.0);
        assert_eq!(params[2].first(), 3.0);
    }
}
