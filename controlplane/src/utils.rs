use crate::traits::HasConditions;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

// Sets the provided condition on any Gateway API object so long as it implements
// the HasConditions trait.
//
// Conditions are keyed by type. When the status is unchanged the existing last
// transition time is kept; reason, message and observed generation always follow
// the new condition.
pub fn set_condition<T: HasConditions>(obj: &mut T, new_cond: metav1::Condition) {
    let conditions = obj.get_conditions_mut();
    match conditions.iter_mut().find(|c| c.type_ == new_cond.type_) {
        Some(condition) if condition.status == new_cond.status => {
            let last_transition_time = condition.last_transition_time.clone();
            *condition = metav1::Condition {
                last_transition_time,
                ..new_cond
            };
        }
        Some(condition) => *condition = new_cond,
        None => conditions.push(new_cond),
    }
}

pub fn find_condition<'a>(
    conditions: &'a [metav1::Condition],
    type_: &str,
) -> Option<&'a metav1::Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

// Returns true if the provided error is a not found error.
pub fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}
