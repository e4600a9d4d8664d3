use gateway_api::apis::standard::{
    gatewayclasses::GatewayClass,
    gateways::{GatewayStatus, GatewayStatusListeners},
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

pub trait HasConditions {
    fn get_conditions_mut(&mut self) -> &mut Vec<metav1::Condition>;
}

impl HasConditions for GatewayStatus {
    fn get_conditions_mut(&mut self) -> &mut Vec<metav1::Condition> {
        self.conditions.get_or_insert_with(Vec::new)
    }
}

impl HasConditions for GatewayStatusListeners {
    fn get_conditions_mut(&mut self) -> &mut Vec<metav1::Condition> {
        &mut self.conditions
    }
}

impl HasConditions for GatewayClass {
    fn get_conditions_mut(&mut self) -> &mut Vec<metav1::Condition> {
        self.status
            .get_or_insert_with(Default::default)
            .conditions
            .get_or_insert_with(Vec::new)
    }
}
